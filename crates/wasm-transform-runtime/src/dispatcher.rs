//! Per-record dispatch over one module instance.

use tracing::{debug, instrument};

use wasm_transform_common::TransformError;
use wasm_transform_core::{GuestLog, TransformInstance};

/// Outcome of running one record through a module.
#[derive(Debug, Clone)]
pub struct TransformReport {
    /// The final record.
    pub record: Vec<u8>,

    /// Exports that produced output, in call order.
    pub applied: Vec<String>,

    /// Exports that exited cleanly without output.
    pub skipped: Vec<String>,

    /// Guest log lines emitted during the dispatch.
    pub logs: Vec<GuestLog>,

    /// Fuel consumed across every guest call.
    pub fuel_consumed: u64,
}

/// Run `record` through every transform of `instance` that matches `table`.
///
/// Matching transforms run in export order, each receiving the previous
/// output. A transform that exits cleanly without output leaves the record
/// as it was. The first error aborts the chain and is returned as is.
#[instrument(skip(instance, record), fields(module = %instance.module_id(), record_len = record.len()))]
pub async fn dispatch(
    instance: &mut TransformInstance,
    table: &str,
    record: &[u8],
) -> Result<TransformReport, TransformError> {
    instance.context_mut().take_logs();
    instance.take_fuel_consumed();

    let matching: Vec<String> = instance
        .transforms()
        .iter()
        .filter(|descriptor| descriptor.matches(table))
        .map(|descriptor| descriptor.export_name.clone())
        .collect();

    let mut current = record.to_vec();
    let mut applied = Vec::new();
    let mut skipped = Vec::new();

    for export in matching {
        match instance.call_transform(&export, &current).await? {
            Some(output) => {
                current = output;
                applied.push(export);
            }
            None => skipped.push(export),
        }
    }

    debug!(
        applied = applied.len(),
        skipped = skipped.len(),
        "Record dispatched"
    );

    Ok(TransformReport {
        record: current,
        applied,
        skipped,
        logs: instance.context_mut().take_logs(),
        fuel_consumed: instance.take_fuel_consumed(),
    })
}
