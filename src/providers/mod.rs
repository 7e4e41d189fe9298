pub mod telegram;
pub mod util;
pub mod yahoo_finance;
