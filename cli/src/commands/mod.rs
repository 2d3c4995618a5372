pub mod echo;
pub mod hash;
pub mod ping;
pub mod serve;
