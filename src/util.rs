pub mod buf;
pub mod rolling_data;
pub mod time;
