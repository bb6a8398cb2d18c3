use std::path::Path;

use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use crate::config::Device;
use crate::error::{ClassifyError, Result};

/// Open an ONNX model with the execution providers matching `device`.
///
/// The CPU provider is always registered last so a missing CUDA runtime
/// degrades to CPU execution.
pub fn init_session(path: &Path, device: Device) -> Result<Session> {
    if !path.exists() {
        return Err(ClassifyError::ModelUnavailable(format!(
            "model file not found: {}",
            path.display()
        )));
    }

    let mut providers = Vec::new();
    if let Device::Cuda { device_id } = device {
        log::info!("Requesting CUDA execution provider (device {})", device_id);
        providers.push(CUDAExecutionProvider::default().with_device_id(device_id).build());
    }
    providers.push(CPUExecutionProvider::default().build());

    log::info!("Loading ONNX model from {:?}...", path);
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_execution_providers(providers)?
        .with_parallel_execution(true)?
        .commit_from_file(path)?;

    for input in &session.inputs {
        log::debug!(
            "Model input: name={}, type={:?}",
            input.name,
            input.input_type
        );
    }
    for output in &session.outputs {
        log::debug!(
            "Model output: name={}, type={:?}",
            output.name,
            output.output_type
        );
    }

    Ok(session)
}

/// Name of the output to read: `preferred` when the graph declares it,
/// otherwise the first output.
pub fn output_name(session: &Session, preferred: &str) -> Result<String> {
    if session.outputs.iter().any(|o| o.name == preferred) {
        return Ok(preferred.to_string());
    }
    session
        .outputs
        .first()
        .map(|o| o.name.clone())
        .ok_or_else(|| ClassifyError::OutputNotFound(preferred.to_string()))
}
