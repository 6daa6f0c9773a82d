// THEORY:
// The `Pixel` is the smallest unit of the detector. It is a "dumb" data container
// for one RGB sample plus the single heuristic the whole detector is built on: a
// luminance-like intensity that needs nothing but the pixel itself.
//
// Intensity is R + 2G + B. Doubling green approximates the eye's luminance response
// (and the sensor's Bayer layout, which has two green sites per cell) while staying
// in integer arithmetic. Normalizing by the largest possible value, 4 * 255, puts
// every intensity in [0, 1], the same units the detection threshold is given in.
//
// Baselines are blended, so they are fractional. `BaselinePixel` is the same sample
// held as f32 channels; both expose the same normalized intensity so the
// discriminator can compare them directly.

pub type Channel = u8;
pub type BaselineChannel = f32;
pub type RawIntensity = u16;
pub type Intensity = f32;

/// Bytes per pixel in every frame and stamp buffer.
pub const CHANNELS: usize = 3;

/// The largest value of R + 2G + B.
pub const MAX_RAW_INTENSITY: RawIntensity = 4 * 255;

/// A single RGB sample from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
}

impl Pixel {
    pub const BLACK: Pixel = Pixel::new(0, 0, 0);

    pub const fn new(red: Channel, green: Channel, blue: Channel) -> Self {
        Self { red, green, blue }
    }

    /// R + 2G + B in sensor units (0..=1020).
    pub fn raw_intensity(&self) -> RawIntensity {
        self.red as RawIntensity + 2 * self.green as RawIntensity + self.blue as RawIntensity
    }

    /// R + 2G + B rescaled to [0, 1].
    pub fn intensity(&self) -> Intensity {
        self.raw_intensity() as Intensity / MAX_RAW_INTENSITY as Intensity
    }
}

impl From<Pixel> for [Channel; CHANNELS] {
    fn from(pixel: Pixel) -> Self {
        [pixel.red, pixel.green, pixel.blue]
    }
}

/// A blended (fractional) RGB sample, as stored in a dark-frame baseline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaselinePixel {
    pub red: BaselineChannel,
    pub green: BaselineChannel,
    pub blue: BaselineChannel,
}

impl BaselinePixel {
    /// Same metric as [`Pixel::intensity`], on fractional channels.
    pub fn intensity(&self) -> Intensity {
        (self.red + 2.0 * self.green + self.blue) / MAX_RAW_INTENSITY as Intensity
    }
}

impl From<Pixel> for BaselinePixel {
    fn from(pixel: Pixel) -> Self {
        Self {
            red: pixel.red as BaselineChannel,
            green: pixel.green as BaselineChannel,
            blue: pixel.blue as BaselineChannel,
        }
    }
}
