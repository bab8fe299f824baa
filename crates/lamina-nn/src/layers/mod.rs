//! Layers - Linear, Normalization, Reshape and Dropout Layers
//!
//! @version 0.1.0
//! @author Lamina Development Team

pub mod dropout;
pub mod linear;
pub mod norm;
pub mod reshape;

// Re-exports
pub use dropout::{Dropout, Dropout1D, Dropout2D, Dropout3D, DropoutNd, RandomApply};
pub use linear::{
    Activation, Bilinear, GeneralLinear, Identity, Linear, LinearOptions, Mlp, Multilinear,
};
pub use norm::{
    BatchNorm, BatchNormOptions, BatchNormState, EvalNorm, GroupNorm, InstanceNorm, LayerNorm,
    NormOptions,
};
pub use reshape::{
    CenterCrop1D, CenterCrop2D, CenterCrop3D, CenterCropNd, Crop1D, Crop2D, Crop3D, CropNd,
    Flatten, Pad1D, Pad2D, Pad3D, PadNd, Padding, RandomCrop1D, RandomCrop2D, RandomCrop3D,
    RandomCropNd, RandomZoom1D, RandomZoom2D, RandomZoom3D, RandomZoomNd, Resize1D, Resize2D,
    Resize3D, ResizeNd, Unflatten, Upsample1D, Upsample2D, Upsample3D, UpsampleNd,
};
