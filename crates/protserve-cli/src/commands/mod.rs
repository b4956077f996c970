//! CLI commands implementation

use anyhow::{Context, Result};
use protserve_cache::ModelCache;
use protserve_client::{CancellationToken, Method, MetricsSnapshot, RemoteLoader, ResilientClient};
use protserve_core::{ModelStatus, ServeConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const MIB: f64 = 1024.0 * 1024.0;

/// How results are printed
pub struct Output {
    pub json: bool,
}

impl Output {
    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

/// Check the inference service; returns whether it is healthy
pub async fn health(config: &ServeConfig, out: &Output) -> Result<bool> {
    let client = ResilientClient::from_config(&config.client)?;
    let report = client.health_check().await;

    if out.json {
        out.print_json(&report)?;
        return Ok(report.is_healthy());
    }

    println!("Service: {} ({})", report.endpoint, report.status);
    println!("  Checked in: {:.1} ms", report.duration_ms);
    println!(
        "  Requests: {} total, {:.1}% success, {:.1} ms average",
        report.total_requests,
        report.success_rate * 100.0,
        report.average_latency_ms
    );
    if let Some(error) = &report.error {
        println!(
            "  Error: {} ({})",
            error,
            report.error_kind.as_deref().unwrap_or("unknown")
        );
    }
    if let Some(info) = &report.service_info {
        println!("  Service info: {}", info);
    }
    if !report.recent_errors.is_empty() {
        println!("\nRecent errors:");
        for e in &report.recent_errors {
            println!("  {} [attempt {}] {}", e.timestamp.to_rfc3339(), e.attempt, e.error);
        }
    }

    Ok(report.is_healthy())
}

/// Send one request through the resilient client. Ctrl-C cancels it.
pub async fn request(
    config: &ServeConfig,
    out: &Output,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let body = body
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("--body must be valid JSON")?;

    let client = ResilientClient::from_config(&config.client)?;
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling request");
                cancel.cancel();
            }
        })
    };

    let result = client
        .execute_cancellable(method, path, body, &cancel)
        .await;
    ctrl_c.abort();
    let metrics = client.metrics_snapshot();

    match result {
        Ok(response) => {
            if out.json {
                let body = response
                    .json::<serde_json::Value>()
                    .unwrap_or_else(|_| serde_json::Value::String(response.body.clone()));
                out.print_json(&serde_json::json!({
                    "status": response.status,
                    "body": body,
                    "metrics": metrics,
                }))?;
            } else {
                println!("Status: {}", response.status);
                println!("{}", response.body);
                print_metrics(&metrics);
            }
            Ok(())
        }
        Err(e) => {
            if !out.json {
                print_metrics(&metrics);
            }
            Err(e.into())
        }
    }
}

fn print_metrics(metrics: &MetricsSnapshot) {
    println!();
    println!(
        "Attempts: {} ({} succeeded, {} failed), {:.1}% success, {:.1} ms average",
        metrics.total_requests,
        metrics.successful_requests,
        metrics.failed_requests,
        metrics.success_rate * 100.0,
        metrics.average_latency_ms
    );
    for e in &metrics.errors {
        println!("  [attempt {}] {} ({:.1} ms)", e.attempt, e.error, e.latency_ms);
    }
}

/// List registered models
pub fn models(config: &ServeConfig, out: &Output) -> Result<()> {
    let registry = config.registry()?;

    if out.json {
        return out.print_json(&registry.iter().collect::<Vec<_>>());
    }

    if registry.is_empty() {
        println!("No models registered");
        return Ok(());
    }

    println!(
        "{:<16} {:>12} {:<14} {}",
        "KEY", "MEMORY(MiB)", "TYPE", "DESCRIPTION"
    );
    println!("{}", "-".repeat(80));
    for model in registry.iter() {
        println!(
            "{:<16} {:>12.1} {:<14} {}",
            model.key,
            mib(model.memory_estimate),
            model.model_type,
            model.description
        );
    }
    println!(
        "\nMemory budget: {:.1} MiB",
        mib(config.cache.max_memory_bytes)
    );

    Ok(())
}

/// Load the configured preload models, then `keys` in order, through the
/// inference service and print the cache state
pub async fn load(config: &ServeConfig, out: &Output, keys: &[String]) -> Result<()> {
    let client = Arc::new(ResilientClient::from_config(&config.client)?);
    let cache = ModelCache::from_config(config, Arc::new(RemoteLoader::new(client)))?;

    let mut failures = BTreeMap::new();
    for key in cache.warm_up().await {
        failures.insert(key, "configured preload failed".to_string());
    }
    for key in keys {
        match cache.ensure_loaded(key).await {
            Ok(_) => info!(key = %key, "Model ready"),
            Err(e) => {
                failures.insert(key.clone(), e.to_string());
            }
        }
    }

    let status = cache.status().await;
    let stats = cache.stats().await;

    if out.json {
        out.print_json(&serde_json::json!({
            "models": status,
            "stats": stats,
            "failures": failures,
        }))?;
    } else {
        print_status(&status);
        println!(
            "\nCharged: {:.1} / {:.1} MiB ({:.1}%)",
            mib(stats.charged),
            mib(stats.budget),
            stats.utilization
        );
        for (key, error) in &failures {
            eprintln!("Failed to load {}: {}", key, error);
        }
    }

    if !failures.is_empty() {
        anyhow::bail!("{} models failed to load", failures.len());
    }
    Ok(())
}

fn print_status(status: &BTreeMap<String, ModelStatus>) {
    println!(
        "{:<16} {:<10} {:>12} {:<25}",
        "KEY", "STATE", "MEMORY(MiB)", "LAST USED"
    );
    println!("{}", "-".repeat(70));
    for (key, s) in status {
        let state = if s.resident {
            "resident"
        } else if s.loading {
            "loading"
        } else {
            "-"
        };
        println!(
            "{:<16} {:<10} {:>12.1} {:<25}",
            key,
            state,
            mib(s.memory_bytes),
            s.last_used
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

/// Print the effective configuration
pub fn show_config(config: &ServeConfig, out: &Output) -> Result<()> {
    if out.json {
        return out.print_json(config);
    }
    print!("{}", config.to_toml_string()?);
    Ok(())
}
