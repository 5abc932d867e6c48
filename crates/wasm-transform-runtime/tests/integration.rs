//! Integration tests for wasm-transform-runtime.
//!
//! Each test writes a guest module as WebAssembly text to a temporary
//! `.wat` file, loads it by path, and drives records through it:
//! - Transform discovery and table filtering
//! - Chaining of several matching transforms
//! - Clean and failing guest exits
//! - Memory protocol violations
//! - Guest logging
//! - Fuel and deadline limits
//! - Module store lifecycle

use std::io::Write;

use tempfile::NamedTempFile;

use wasm_transform_common::{
    AllocationMode, EngineConfig, ExecutionConfig, GuestFailure, RuntimeConfig, TransformError,
};
use wasm_transform_core::LogLevel;
use wasm_transform_runtime::{DataTransformer, TransformRuntime};

/// Bump allocator, memory export, and the `pack` helper shared by guests.
const PRELUDE: &str = r#"
    (memory (export "memory") 1)
    (global $heap (mut i32) (i32.const 1024))

    (func (export "allocate") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (global.get $heap) (local.get $len)))
        (local.get $ptr))

    (func $pack (param $ptr i32) (param $len i32) (result i64)
        (i64.or
            (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
            (i64.extend_i32_u (local.get $len))))
"#;

fn guest(imports: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".wat")
        .tempfile()
        .unwrap();
    write!(file, "(module {imports} {PRELUDE} {body})").unwrap();
    file.flush().unwrap();
    file
}

fn path(file: &NamedTempFile) -> String {
    file.path().display().to_string()
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        engine: EngineConfig {
            allocation: vec![AllocationMode::OnDemand],
            ..Default::default()
        },
        execution: ExecutionConfig {
            inherit_stdio: false,
            ..Default::default()
        },
    }
}

async fn runtime_with(file: &NamedTempFile, config: &RuntimeConfig) -> TransformRuntime {
    let runtime = TransformRuntime::new(config).unwrap();
    runtime.initialize_module(&path(file)).await.unwrap();
    runtime
}

fn guest_failure(err: TransformError) -> GuestFailure {
    match err {
        TransformError::GuestExecutionFailure { cause, .. } => cause,
        other => panic!("expected a guest failure, got {other:?}"),
    }
}

// ============================================================================
// Test: Discovery and Filtering
// ============================================================================

#[tokio::test]
async fn test_quoted_filter_applies_to_matching_table_only() {
    let file = guest(
        "",
        r#"
        (data (i32.const 16) "masked")
        (func (export "_cqtransform_\"users\"@@v1") (param i32 i32) (result i64)
            (call $pack (i32.const 16) (i32.const 6)))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    let transforms = runtime.transforms(&id).await.unwrap();
    assert_eq!(transforms.len(), 1);
    assert_eq!(transforms[0].filter_pattern, "users");

    let users = runtime.execute_module(&id, "users", b"{\"ssn\":1}").await.unwrap();
    assert_eq!(users, b"masked");

    let orders = runtime.execute_module(&id, "orders", b"{\"id\":1}").await.unwrap();
    assert_eq!(orders, b"{\"id\":1}");

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_module_without_transforms_passes_records_through() {
    let file = guest("", "");
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    assert!(runtime.transforms(&id).await.unwrap().is_empty());

    let report = runtime
        .execute_module_with_report(&id, "users", b"row")
        .await
        .unwrap();
    assert_eq!(report.record, b"row");
    assert!(report.applied.is_empty());
    assert!(report.skipped.is_empty());

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_glob_filter() {
    let file = guest(
        "",
        r#"
        (data (i32.const 16) "hit")
        (func (export "_cqtransform_aws_*@@v1") (param i32 i32) (result i64)
            (call $pack (i32.const 16) (i32.const 3)))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    assert_eq!(runtime.execute_module(&id, "aws_ec2", b"x").await.unwrap(), b"hit");
    assert_eq!(runtime.execute_module(&id, "aws_", b"x").await.unwrap(), b"hit");
    assert_eq!(runtime.execute_module(&id, "gcp_vm", b"x").await.unwrap(), b"x");
    assert_eq!(runtime.execute_module(&id, "AWS_EC2", b"x").await.unwrap(), b"x");

    runtime.close().await.unwrap();
}

// ============================================================================
// Test: Chaining
// ============================================================================

#[tokio::test]
async fn test_matching_transforms_chain_in_export_order() {
    let file = guest(
        "",
        r#"
        (func (export "_cqtransform_\"users\"@@increment") (param $ptr i32) (param $len i32) (result i64)
            (local $i i32)
            (block $done
                (loop $next
                    (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
                    (i32.store8
                        (i32.add (local.get $ptr) (local.get $i))
                        (i32.add
                            (i32.load8_u (i32.add (local.get $ptr) (local.get $i)))
                            (i32.const 1)))
                    (local.set $i (i32.add (local.get $i) (i32.const 1)))
                    (br $next)))
            (call $pack (local.get $ptr) (local.get $len)))

        (func (export "_cqtransform_*@@stamp") (param $ptr i32) (param $len i32) (result i64)
            (i32.store8 (local.get $ptr) (i32.const 88))
            (call $pack (local.get $ptr) (local.get $len)))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    let report = runtime
        .execute_module_with_report(&id, "users", b"abc")
        .await
        .unwrap();
    assert_eq!(report.record, b"Xcd");
    assert_eq!(
        report.applied,
        vec![
            "_cqtransform_\"users\"@@increment".to_string(),
            "_cqtransform_*@@stamp".to_string(),
        ]
    );
    assert!(report.fuel_consumed > 0);

    // Only the wildcard transform matches other tables.
    let orders = runtime.execute_module(&id, "orders", b"abc").await.unwrap();
    assert_eq!(orders, b"Xbc");

    runtime.close().await.unwrap();
}

// ============================================================================
// Test: Guest Exits
// ============================================================================

#[tokio::test]
async fn test_clean_exit_leaves_record_unchanged() {
    let file = guest(
        r#"(import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))"#,
        r#"
        (func (export "_cqtransform_users@@skip") (param i32 i32) (result i64)
            (call $proc_exit (i32.const 0))
            (i64.const 0))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    let report = runtime
        .execute_module_with_report(&id, "users", b"row")
        .await
        .unwrap();
    assert_eq!(report.record, b"row");
    assert_eq!(report.skipped, vec!["_cqtransform_users@@skip".to_string()]);
    assert!(report.applied.is_empty());

    // A clean exit does not poison the instance.
    let again = runtime.execute_module(&id, "users", b"row").await.unwrap();
    assert_eq!(again, b"row");

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_nonzero_exit_is_reported() {
    let file = guest(
        r#"(import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))"#,
        r#"
        (func (export "_cqtransform_users@@fail") (param i32 i32) (result i64)
            (call $proc_exit (i32.const 3))
            (i64.const 0))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    let err = runtime.execute_module(&id, "users", b"row").await.unwrap_err();
    assert!(err.is_guest_fault());
    assert_eq!(guest_failure(err), GuestFailure::Exit { code: 3 });

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_trap_does_not_poison_instance() {
    let file = guest(
        "",
        r#"
        (func (export "_cqtransform_users@@boom") (param i32 i32) (result i64)
            (unreachable))
        (data (i32.const 16) "ok")
        (func (export "_cqtransform_orders@@ok") (param i32 i32) (result i64)
            (call $pack (i32.const 16) (i32.const 2)))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    let err = runtime.execute_module(&id, "users", b"row").await.unwrap_err();
    assert!(matches!(guest_failure(err), GuestFailure::Trap { .. }));

    let ok = runtime.execute_module(&id, "orders", b"row").await.unwrap();
    assert_eq!(ok, b"ok");

    runtime.close().await.unwrap();
}

// ============================================================================
// Test: Memory Protocol
// ============================================================================

#[tokio::test]
async fn test_output_outside_memory_is_rejected() {
    let file = guest(
        "",
        r#"
        (func (export "_cqtransform_users@@bad") (param i32 i32) (result i64)
            (call $pack (i32.const 65530) (i32.const 10)))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;

    let err = runtime
        .execute_module(&path(&file), "users", b"row")
        .await
        .unwrap_err();
    match err {
        TransformError::MemoryReadOutOfRange(range) => {
            assert_eq!(range.offset, 65_530);
            assert_eq!(range.length, 10);
            assert_eq!(range.memory_size, 65_536);
        }
        other => panic!("expected MemoryReadOutOfRange, got {other:?}"),
    }

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_allocation_outside_memory_is_rejected() {
    let file = tempfile::Builder::new().suffix(".wat").tempfile().unwrap();
    std::fs::write(
        file.path(),
        r#"
        (module
            (memory (export "memory") 1)
            (func (export "allocate") (param i32) (result i32)
                (i32.const 65534))
            (func (export "_cqtransform_users@@v1") (param i32 i32) (result i64)
                (i64.const 0)))
        "#,
    )
    .unwrap();
    let runtime = runtime_with(&file, &config()).await;

    let err = runtime
        .execute_module(&path(&file), "users", b"four")
        .await
        .unwrap_err();
    assert!(matches!(err, TransformError::MemoryWriteOutOfRange(_)));

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_allocate_is_a_guest_failure() {
    let file = tempfile::Builder::new().suffix(".wat").tempfile().unwrap();
    std::fs::write(
        file.path(),
        r#"
        (module
            (memory (export "memory") 1)
            (func (export "_cqtransform_users@@v1") (param i32 i32) (result i64)
                (i64.const 0)))
        "#,
    )
    .unwrap();
    let runtime = runtime_with(&file, &config()).await;

    let err = runtime
        .execute_module(&path(&file), "users", b"row")
        .await
        .unwrap_err();
    assert_eq!(
        guest_failure(err),
        GuestFailure::MissingExport {
            name: "allocate".to_string()
        }
    );

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_wrong_transform_signature() {
    let file = guest(
        "",
        r#"
        (func (export "_cqtransform_users@@v1") (param i32 i32) (result i32)
            (i32.const 0))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;

    let err = runtime
        .execute_module(&path(&file), "users", b"row")
        .await
        .unwrap_err();
    assert!(matches!(
        guest_failure(err),
        GuestFailure::SignatureMismatch { .. }
    ));

    runtime.close().await.unwrap();
}

// ============================================================================
// Test: Guest Logging
// ============================================================================

#[tokio::test]
async fn test_guest_logs_are_captured() {
    let file = guest(
        r#"
        (import "env" "log" (func $log (param i32 i32)))
        (import "env" "log_at" (func $log_at (param i32 i32 i32)))
        "#,
        r#"
        (data (i32.const 16) "masking row")
        (data (i32.const 32) "careful")
        (func (export "_cqtransform_users@@v1") (param $ptr i32) (param $len i32) (result i64)
            (call $log (i32.const 16) (i32.const 11))
            (call $log_at (i32.const 2) (i32.const 32) (i32.const 7))
            (call $pack (local.get $ptr) (local.get $len)))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    let report = runtime
        .execute_module_with_report(&id, "users", b"row")
        .await
        .unwrap();
    assert_eq!(report.record, b"row");
    assert_eq!(report.logs.len(), 2);
    assert_eq!(report.logs[0].message, "masking row");
    assert_eq!(report.logs[0].level, LogLevel::Info);
    assert_eq!(report.logs[1].message, "careful");
    assert_eq!(report.logs[1].level, LogLevel::Warn);

    // Logs belong to one dispatch.
    let report = runtime
        .execute_module_with_report(&id, "orders", b"row")
        .await
        .unwrap();
    assert!(report.logs.is_empty());

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_log_outside_memory_traps() {
    let file = guest(
        r#"(import "env" "log" (func $log (param i32 i32)))"#,
        r#"
        (func (export "_cqtransform_users@@v1") (param $ptr i32) (param $len i32) (result i64)
            (call $log (i32.const 65530) (i32.const 100))
            (call $pack (local.get $ptr) (local.get $len)))
        "#,
    );
    let runtime = runtime_with(&file, &config()).await;

    let err = runtime
        .execute_module(&path(&file), "users", b"row")
        .await
        .unwrap_err();
    assert!(matches!(guest_failure(err), GuestFailure::Trap { .. }));

    runtime.close().await.unwrap();
}

// ============================================================================
// Test: Limits
// ============================================================================

const SPIN: &str = r#"
    (func (export "_cqtransform_users@@spin") (param i32 i32) (result i64)
        (loop $forever (br $forever))
        (i64.const 0))
"#;

#[tokio::test]
async fn test_fuel_exhaustion() {
    let file = guest("", SPIN);
    let mut config = config();
    config.execution.max_fuel = 10_000;
    config.engine.epoch_interruption = false;
    let runtime = runtime_with(&file, &config).await;
    let id = path(&file);

    let err = runtime.execute_module(&id, "users", b"row").await.unwrap_err();
    assert_eq!(guest_failure(err), GuestFailure::FuelExhausted);

    // Fuel is re-armed per call, so the instance stays usable.
    let err = runtime.execute_module(&id, "users", b"row").await.unwrap_err();
    assert_eq!(guest_failure(err), GuestFailure::FuelExhausted);

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_timeout_poisons_instance() {
    let file = guest("", SPIN);
    let mut config = config();
    config.execution.fuel_metering = false;
    config.execution.timeout_ms = 50;
    let runtime = runtime_with(&file, &config).await;
    let id = path(&file);

    let err = runtime.execute_module(&id, "users", b"row").await.unwrap_err();
    assert_eq!(guest_failure(err), GuestFailure::Timeout { timeout_ms: 50 });

    let err = runtime.execute_module(&id, "users", b"row").await.unwrap_err();
    assert_eq!(guest_failure(err), GuestFailure::Poisoned);

    // Removing the module allows a fresh instance.
    assert!(runtime.remove_module(&id).await.unwrap());
    runtime.initialize_module(&id).await.unwrap();
    assert_eq!(
        runtime.execute_module(&id, "orders", b"row").await.unwrap(),
        b"row"
    );

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_zero_timeout_runs_without_deadline() {
    let file = guest(
        "",
        r#"
        (data (i32.const 16) "done")
        (func (export "_cqtransform_users@@v1") (param i32 i32) (result i64)
            (call $pack (i32.const 16) (i32.const 4)))
        "#,
    );
    let mut config = config();
    config.execution.timeout_ms = 0;
    let runtime = TransformRuntime::new(&config).unwrap();

    // Let the ticker advance the epoch before any store is armed.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let id = path(&file);
    runtime.initialize_module(&id).await.unwrap();
    for _ in 0..3 {
        assert_eq!(
            runtime.execute_module(&id, "users", b"row").await.unwrap(),
            b"done"
        );
    }

    runtime.close().await.unwrap();
}

// ============================================================================
// Test: Module Store Lifecycle
// ============================================================================

#[tokio::test]
async fn test_duplicate_initialize_is_rejected() {
    let file = guest("", "");
    let runtime = runtime_with(&file, &config()).await;

    let err = runtime.initialize_module(&path(&file)).await.unwrap_err();
    assert!(matches!(err, TransformError::AlreadyInitialized { .. }));
    assert_eq!(runtime.modules(), vec![path(&file)]);

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_modules_are_listed_sorted() {
    let a = guest("", "");
    let b = guest("", "");
    let runtime = TransformRuntime::new(&config()).unwrap();
    runtime.initialize_module(&path(&b)).await.unwrap();
    runtime.initialize_module(&path(&a)).await.unwrap();

    let mut expected = vec![path(&a), path(&b)];
    expected.sort();
    assert_eq!(runtime.modules(), expected);

    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_module_is_a_compile_failure() {
    let mut file = tempfile::Builder::new().suffix(".wasm").tempfile().unwrap();
    file.write_all(b"not webassembly").unwrap();
    file.flush().unwrap();

    let runtime = TransformRuntime::new(&config()).unwrap();
    let err = runtime.initialize_module(&path(&file)).await.unwrap_err();
    assert!(matches!(err, TransformError::ModuleCompileFailure { .. }));
    assert!(runtime.modules().is_empty());
}

#[tokio::test]
async fn test_close_releases_modules() {
    let file = guest("", "");
    let runtime = runtime_with(&file, &config()).await;
    let id = path(&file);

    runtime.close().await.unwrap();
    runtime.close().await.unwrap();

    assert!(runtime.modules().is_empty());
    assert!(matches!(
        runtime.execute_module(&id, "users", b"row").await,
        Err(TransformError::RuntimeClosed)
    ));
}

#[tokio::test]
async fn test_runtime_as_data_transformer() {
    let file = guest(
        "",
        r#"
        (data (i32.const 16) "masked")
        (func (export "_cqtransform_users@@v1") (param i32 i32) (result i64)
            (call $pack (i32.const 16) (i32.const 6)))
        "#,
    );
    let transformer: Box<dyn DataTransformer> =
        Box::new(TransformRuntime::new(&config()).unwrap());
    let id = path(&file);

    transformer.initialize_module(&id).await.unwrap();
    assert_eq!(transformer.modules(), vec![id.clone()]);
    assert_eq!(
        transformer.execute_module(&id, "users", b"row").await.unwrap(),
        b"masked"
    );
    transformer.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_on_distinct_modules() {
    let body = r#"
        (func (export "_cqtransform_*@@stamp") (param $ptr i32) (param $len i32) (result i64)
            (i32.store8 (local.get $ptr) (i32.const 88))
            (call $pack (local.get $ptr) (local.get $len)))
    "#;
    let a = guest("", body);
    let b = guest("", body);
    let runtime = std::sync::Arc::new(TransformRuntime::new(&config()).unwrap());
    runtime.initialize_module(&path(&a)).await.unwrap();
    runtime.initialize_module(&path(&b)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let runtime = std::sync::Arc::clone(&runtime);
        let id = if i % 2 == 0 { path(&a) } else { path(&b) };
        handles.push(tokio::spawn(async move {
            runtime.execute_module(&id, "users", b"row").await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), b"Xow");
    }

    runtime.close().await.unwrap();
}
