//! Backend selection
//!
//! CPU (`burn-ndarray`) by default, CUDA when built with `--features cuda`.

use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray<f32>;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (cuda or ndarray) must be enabled!");

/// Get the default device
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Human-readable name of the compiled-in backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
    {
        "NdArray (CPU)"
    }
}
