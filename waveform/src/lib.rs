#![deny(
    absolute_paths_not_starting_with_crate,
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unconditional_recursion,
    unreachable_patterns,
    unreachable_pub,
    unused_import_braces,
    unused_lifetimes,
    unused_must_use,
    unused_qualifications,
    variant_size_differences
)]

//! Load, inspect, and save Rohde & Schwarz RF waveform files: the tag-delimited `.wv`
//! container (including multi-segment `MWV` files), the bare interleaved-float `.iqw`
//! format, and the tar-bundled `.iq.tar` archive.

#[macro_use]
mod macros;

pub mod binary;
pub mod codec;
pub mod common;
pub mod dsp;
mod error;
mod facade;
pub mod io;
pub mod model;

pub use error::{Error, Result};
pub use facade::Format;
pub use model::{Metadata, Sample, Segment, Value, Waveform};
