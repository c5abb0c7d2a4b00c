//! S5: Simplified State Space layers for irregularly sampled sequences

// Complex arithmetic on pairs of real tensors
pub mod complex;
pub mod error;

// Diagonal SSM parameters, discretization and the associative scan
pub mod discretize;
pub mod parallel_scan;
pub mod s5_params;
pub mod s5_core;

// Irregular sampling: elapsed times, timestep modes
pub mod time_adapter;

// Layer, stacked encoder and full model
pub mod s5_layer;
pub mod s5_encoder;
pub mod model;

pub mod device;

pub use complex::ComplexTensor;
pub use discretize::{discretize, DiscreteStep, Discretization};
pub use error::{Result, S5Error};
pub use model::{ModelOutput, ReductionMode, S5Model, S5ModelConfig};
pub use parallel_scan::{associative_scan, parallel_scan, sequential_scan, ScanElement};
pub use s5_core::apply_s5_ssm;
pub use s5_encoder::{StackedEncoder, StackedEncoderConfig};
pub use s5_layer::{Activation, SequenceLayer, SequenceLayerConfig};
pub use s5_params::{CInit, EigenInit, S5SsmConfig, StateSpaceParams};
pub use time_adapter::{IrregularTimeAdapter, SequenceBatch, TimestepMode};
