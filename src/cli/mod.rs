pub mod rates;
pub mod run;
pub mod setup;
pub mod subscriber;
pub mod ui;
