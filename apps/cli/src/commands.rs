//! CLI command implementations

use crate::output::{
    average_speed, format_bytes, format_elapsed, format_speed, print_json, StreamSummary,
};
use crate::progress::{spawn_event_pump, DownloadProgress};
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, bail, Context, Result};
use console::style;
use rangedl_core::{parse_rate_prefix, RangedlCore, RangedlError, SettingsStore};
use rangedl_types::{DownloadTarget, FailurePolicy, Settings};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub struct GetArgs {
    pub url: String,
    pub output_dir: Option<PathBuf>,
    pub filename: Option<String>,
    pub segments: Option<u32>,
    pub headers: Vec<String>,
    pub sha256: Option<String>,
    pub fail_fast: bool,
    pub limit: Option<u64>,
}

pub struct StreamArgs {
    pub url: String,
    pub output_dir: Option<PathBuf>,
    pub filename: Option<String>,
    pub headers: Vec<String>,
    pub limit_kbps: Option<u64>,
}

/// Parse repeated `Name: value` arguments
pub fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::with_capacity(raw.len());
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("Header must look like 'Name: value', got '{}'", entry))?;
        let name = name.trim();
        if name.is_empty() {
            bail!("Header name is empty in '{}'", entry);
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn build_target(
    url: String,
    output_dir: Option<PathBuf>,
    filename: Option<String>,
    headers: &[String],
    settings: &Settings,
) -> Result<DownloadTarget> {
    let dir = output_dir.unwrap_or_else(|| settings.default_output_dir.clone());
    let mut target = DownloadTarget::new(url, dir);
    target.headers = parse_headers(headers)?;
    if let Some(name) = filename {
        target = target.with_filename(name);
    }
    Ok(target)
}

/// Cancel everything on Ctrl-C
fn cancel_on_ctrl_c(core: Arc<RangedlCore>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            core.shutdown();
        }
    });
}

// ============================================================================
// Download Commands
// ============================================================================

pub async fn get(mut settings: Settings, args: GetArgs, format: OutputFormat) -> Result<()> {
    if args.fail_fast {
        settings.failure_policy = FailurePolicy::FailFast;
    }
    if args.limit.is_some() {
        settings.speed_limit = args.limit;
    }

    let mut target = build_target(
        args.url,
        args.output_dir,
        args.filename,
        &args.headers,
        &settings,
    )?;
    if let Some(digest) = args.sha256 {
        target = target.with_sha256(digest);
    }

    let core = Arc::new(RangedlCore::new(settings)?);
    cancel_on_ctrl_c(core.clone());

    let download = core.segmented(target.clone(), args.segments);
    let progress = Arc::new(DownloadProgress::new());
    let pump = match format {
        OutputFormat::Human => {
            let label = target.output_filename.clone().unwrap_or_else(|| target.url.clone());
            progress.add_download(download.id(), &label).await;
            Some(spawn_event_pump(progress.clone(), core.subscribe()))
        }
        OutputFormat::Json => None,
    };

    let result = core.run_segmented(download).await;
    if let Some(pump) = pump {
        // Let the final status event reach the bar before tearing down.
        tokio::task::yield_now().await;
        pump.abort();
    }
    progress.clear().await;

    let report = result.with_context(|| format!("Download of {} failed", target.url))?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Human => {
            println!(
                "{} Downloaded {} ({}) in {}",
                style("✓").green().bold(),
                style(report.path.display()).cyan(),
                format_bytes(report.file_size),
                format_elapsed(report.elapsed)
            );
            println!(
                "  {} segments, average {}",
                report.segments.len(),
                format_speed(average_speed(report.file_size, report.elapsed))
            );
        }
    }

    Ok(())
}

pub async fn stream(settings: Settings, args: StreamArgs, format: OutputFormat) -> Result<()> {
    let url = match args.limit_kbps {
        Some(kbps) if parse_rate_prefix(&args.url).0.is_none() => format!("{}:{}", kbps, args.url),
        _ => args.url,
    };
    let target = build_target(url, args.output_dir, args.filename, &args.headers, &settings)?;

    let core = Arc::new(RangedlCore::new(settings)?);
    cancel_on_ctrl_c(core.clone());

    let progress = Arc::new(DownloadProgress::new());
    let events = core.subscribe();
    let handle = core.spawn_resumable(target.clone()).await;
    let pump = match format {
        OutputFormat::Human => {
            let label = target.output_filename.clone().unwrap_or_else(|| target.url.clone());
            progress.add_download(handle.id(), &label).await;
            Some(spawn_event_pump(progress.clone(), events))
        }
        OutputFormat::Json => None,
    };

    let outcome = handle.wait().await;
    if let Some(pump) = pump {
        tokio::task::yield_now().await;
        pump.abort();
    }
    progress.clear().await;

    if format == OutputFormat::Json {
        print_json(&StreamSummary::from(&outcome))?;
    }

    match &outcome.result {
        Ok(()) => {
            if format == OutputFormat::Human {
                let path = outcome
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                let verb = if outcome.is_resume { "Resumed" } else { "Downloaded" };
                println!(
                    "{} {} {} ({}) in {}",
                    style("✓").green().bold(),
                    verb,
                    style(path).cyan(),
                    format_bytes(outcome.read_num),
                    format_elapsed(outcome.elapsed)
                );
            }
            Ok(())
        }
        Err(RangedlError::AlreadyDownloaded(path)) => {
            if format == OutputFormat::Human {
                println!(
                    "{} {} is already complete",
                    style("✓").green().bold(),
                    style(path.display()).cyan()
                );
            }
            Ok(())
        }
        Err(e) => Err(anyhow!("Download of {} failed: {}", target.url, e)),
    }
}

// ============================================================================
// Probe
// ============================================================================

pub async fn probe_urls(
    settings: Settings,
    urls: Vec<String>,
    headers: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    if urls.is_empty() {
        bail!("No URLs given");
    }
    let headers = parse_headers(&headers)?;
    let core = RangedlCore::new(settings)?;

    let mut results = Vec::with_capacity(urls.len());
    for url in &urls {
        results.push((url, core.probe(url, &headers).await));
    }

    match format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = results
                .iter()
                .map(|(url, result)| match result {
                    Ok(info) => serde_json::to_value(info).unwrap_or(serde_json::Value::Null),
                    Err(e) => serde_json::json!({ "url": url, "error": e.to_string() }),
                })
                .collect();
            print_json(&json)?;
        }
        OutputFormat::Human => {
            for (url, result) in &results {
                match result {
                    Err(e) => {
                        println!("{} {}: {}", style("✗").red(), url, style(e).red());
                    }
                    Ok(info) => {
                        println!(
                            "{} {}",
                            style("✓").green(),
                            info.filename.as_deref().unwrap_or("(no filename)")
                        );
                        if info.final_url != info.url {
                            println!("    Redirected: {}", info.final_url);
                        }
                        if let Some(size) = info.size {
                            println!("    Size: {}", format_bytes(size));
                        }
                        if let Some(ref ct) = info.content_type {
                            println!("    Type: {}", ct);
                        }
                        println!(
                            "    Resumable: {}",
                            if info.resumable {
                                style("Yes").green()
                            } else {
                                style("No").yellow()
                            }
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config
// ============================================================================

pub async fn config_action(
    config_path: &Path,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    let load = || Settings::load(config_path);

    match action {
        None | Some(ConfigAction::Show) => {
            let settings = load().await?;
            match format {
                OutputFormat::Json => print_json(&settings)?,
                OutputFormat::Human => {
                    println!("rangedl Configuration ({}):", config_path.display());
                    println!();
                    println!("  Default output dir: {}", settings.default_output_dir.display());
                    println!(
                        "  Segments: {}",
                        settings
                            .segments
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "one per CPU".to_string())
                    );
                    println!(
                        "  Speed limit: {}",
                        settings
                            .speed_limit
                            .map(format_speed)
                            .unwrap_or_else(|| "Unlimited".to_string())
                    );
                    println!("  Failure policy: {:?}", settings.failure_policy);
                    println!("  User agent: {}", settings.user_agent);
                    println!(
                        "  Timeouts: {}s request, {}s connect",
                        settings.request_timeout_secs, settings.connect_timeout_secs
                    );
                    println!("  Proxy: {}", settings.proxy.mode);
                }
            }
        }

        Some(ConfigAction::Path) => println!("{}", config_path.display()),

        Some(ConfigAction::Get { key }) => {
            let value = config_value(&load().await?, &key)?;
            println!("{}", value);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = load().await?;
            set_config_value(&mut settings, &key, &value)?;
            settings.save(config_path).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            if yes || confirm("Reset all settings to defaults?")? {
                Settings::default().save(config_path).await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}

fn config_value(settings: &Settings, key: &str) -> Result<String> {
    let optional = |v: Option<String>| v.unwrap_or_else(|| "unset".to_string());
    Ok(match key {
        "default_output_dir" => settings.default_output_dir.display().to_string(),
        "segments" => optional(settings.segments.map(|s| s.to_string())),
        "speed_limit" => optional(settings.speed_limit.map(|s| s.to_string())),
        "user_agent" => settings.user_agent.clone(),
        "request_timeout_secs" => settings.request_timeout_secs.to_string(),
        "connect_timeout_secs" => settings.connect_timeout_secs.to_string(),
        "failure_policy" => match settings.failure_policy {
            FailurePolicy::BestEffort => "best_effort".to_string(),
            FailurePolicy::FailFast => "fail_fast".to_string(),
        },
        "progress_interval_ms" => settings.progress_interval_ms.to_string(),
        "proxy.mode" => settings.proxy.mode.clone(),
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    })
}

/// Parse a value that may be cleared with `unset`, `none` or an empty string
fn optional<T>(value: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        "" | "unset" | "none" => Ok(None),
        v => Ok(Some(v.parse()?)),
    }
}

fn set_config_value(settings: &mut Settings, key: &str, value: &str) -> Result<()> {
    match key {
        "default_output_dir" => settings.default_output_dir = PathBuf::from(value),
        "segments" => settings.segments = optional(value)?,
        "speed_limit" => settings.speed_limit = optional(value)?,
        "user_agent" => settings.user_agent = value.to_string(),
        "request_timeout_secs" => settings.request_timeout_secs = value.parse()?,
        "connect_timeout_secs" => settings.connect_timeout_secs = value.parse()?,
        "failure_policy" => {
            settings.failure_policy = match value {
                "best_effort" => FailurePolicy::BestEffort,
                "fail_fast" => FailurePolicy::FailFast,
                other => bail!("Unknown failure policy '{}'", other),
            }
        }
        "progress_interval_ms" => settings.progress_interval_ms = value.parse()?,
        "proxy.mode" => settings.proxy.mode = value.to_string(),
        _ => bail!("Unknown or read-only config key: {}", key),
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_arguments() {
        let headers = parse_headers(&[
            "Authorization: Bearer abc".to_string(),
            "X-Empty:".to_string(),
        ])
        .unwrap();
        assert_eq!(headers["Authorization"], "Bearer abc");
        assert_eq!(headers["X-Empty"], "");

        assert!(parse_headers(&["no-colon".to_string()]).is_err());
        assert!(parse_headers(&[": value".to_string()]).is_err());
    }

    #[test]
    fn config_keys_round_trip_through_set_and_get() {
        let mut settings = Settings::default();
        set_config_value(&mut settings, "segments", "6").unwrap();
        set_config_value(&mut settings, "failure_policy", "fail_fast").unwrap();
        set_config_value(&mut settings, "speed_limit", "unset").unwrap();

        assert_eq!(config_value(&settings, "segments").unwrap(), "6");
        assert_eq!(config_value(&settings, "failure_policy").unwrap(), "fail_fast");
        assert_eq!(config_value(&settings, "speed_limit").unwrap(), "unset");
        assert!(config_value(&settings, "theme").is_err());
        assert!(set_config_value(&mut settings, "failure_policy", "sometimes").is_err());
    }

    #[test]
    fn segment_count_out_of_range_is_rejected() {
        let mut settings = Settings::default();
        set_config_value(&mut settings, "segments", "12").unwrap();

        // 2^32 + 4 would wrap to 4 if narrowed from u64.
        assert!(set_config_value(&mut settings, "segments", "4294967300").is_err());
        assert_eq!(settings.segments, Some(12));

        set_config_value(&mut settings, "segments", "none").unwrap();
        assert_eq!(settings.segments, None);
    }
}
