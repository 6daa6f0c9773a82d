pub mod dark_calibrator;
pub mod frame;
pub mod pixel;
pub mod stamp;
pub mod stamp_extractor;
pub mod threshold_discriminator;
