pub mod run;
pub mod status;
pub mod stop;
pub mod submit;
