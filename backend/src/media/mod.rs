pub mod asset;
pub mod audio;
pub mod classifier;
pub mod frames;
