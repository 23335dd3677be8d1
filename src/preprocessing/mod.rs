//! Data preprocessing module
//!
//! Standardization of features and labels:
//! - [`StandardScaler`] for per-column population mean/std scaling
//! - [`ScalingTransform`] pairing independent feature and label scalers

mod scaler;

pub use scaler::{ScalingTransform, StandardScaler};
