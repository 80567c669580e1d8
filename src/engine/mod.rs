pub mod cancel;
pub mod payload;
pub mod run;
pub mod stream;
pub mod wire;
