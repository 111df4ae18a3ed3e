pub mod activation;
pub mod audio;
pub mod bus;
pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod presentation;
pub mod proximity;
pub mod sensor;
pub mod state;
pub mod stop;
