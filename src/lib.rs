pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod storage;

#[cfg(test)]
mod testing;
