pub mod bands;
pub mod beat;
pub mod decode;
pub mod features;
pub mod fft;
pub mod pipeline;
pub mod reactor;
