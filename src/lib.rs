//! Scalar autodiff LSTMs for comparing sequence-model variants
//! on small univariate datasets.

pub mod backprop_fns;
pub mod dataloader;
pub mod datasets;
pub mod driver;
pub mod init;
pub mod loss;
pub mod model;
pub mod nn;
pub mod optim;
pub mod pipeline;
pub mod plot;
pub mod plotly;
pub mod preprocess;
pub mod tensor;
pub mod train;
pub mod values;
