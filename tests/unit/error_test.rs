//! Tests for error types

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use prometheus_fleet::core::{ExecError, FleetError};

#[test]
fn test_timeout_error() {
    let err = FleetError::Timeout {
        after: Duration::from_secs(60),
    };
    assert_eq!(format!("{}", err), "operation timed out after 60 seconds");
}

#[test]
fn test_disposed_error() {
    let err = FleetError::Disposed {
        op: "run",
        ship: "abc".to_string(),
    };
    assert_eq!(format!("{}", err), "cannot call run on disposed ship abc");
}

#[test]
fn test_dirty_error() {
    let err = FleetError::Dirty("abc".to_string());
    assert_eq!(format!("{}", err), "cannot call run on dirty ship abc");
}

#[test]
fn test_shutdown_error_keeps_source() {
    let err = FleetError::Shutdown {
        instance: "builder#7".to_string(),
        attempts: 4,
        source: Box::new(FleetError::Provider("rejected".to_string())),
    };
    assert_eq!(
        format!("{}", err),
        "failed to shut down instance builder#7 after 4 attempts: provider error: rejected"
    );
    assert_eq!(
        err.source().map(ToString::to_string),
        Some("provider error: rejected".to_string())
    );
}

#[test]
fn test_bootstrap_error_shares_source() {
    let source = Arc::new(FleetError::NoBaseImage("node-v6".to_string()));
    let a = FleetError::Bootstrap {
        name: "node-v6".to_string(),
        source: Arc::clone(&source),
    };
    let b = FleetError::Bootstrap {
        name: "node-v6".to_string(),
        source,
    };
    assert_eq!(a.to_string(), b.to_string());
    assert!(a.to_string().contains("no base image candidate available"));
}

#[test]
fn test_exec_error_is_transparent() {
    let err: FleetError = ExecError::Exit {
        code: 2,
        stdout: "out".to_string(),
        stderr: "err".to_string(),
    }
    .into();
    assert_eq!(format!("{}", err), "command exited with code 2:\n\nout\n\nerr");
    assert_eq!(
        FleetError::from(ExecError::Closed).to_string(),
        "cannot interact with a closed connection"
    );
}

#[test]
fn test_job_error_shows_chain() {
    let inner = anyhow::anyhow!("disk full").context("npm install failed");
    let err = FleetError::Job(inner);
    assert_eq!(format!("{}", err), "job failed: npm install failed: disk full");
}

#[test]
fn test_shut_down_error() {
    assert_eq!(FleetError::ShutDown.to_string(), "fleet has been shut down");
}
