mod helpers;
mod tidier_tests;
mod transaction_tests;
