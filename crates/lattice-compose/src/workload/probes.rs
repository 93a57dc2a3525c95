//! Health check to liveness/readiness probe translation

use lattice_workload::k8s::{ExecAction, HttpGetAction, Probe};

use crate::annotations;
use crate::error::Result;
use crate::project::HealthCheckConfig;

use super::ServiceUnit;

/// Port used for HTTP checks when nothing else is declared
pub const DEFAULT_HTTP_PROBE_PORT: u16 = 80;

/// Split a command line on unquoted whitespace, removing the quotes.
///
/// Backslash escapes the next character outside single quotes.
pub fn split_shell_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('\''), c) => current.push(c),
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Command for an exec probe: strips a leading `CMD`/`CMD-SHELL` and splits a single remaining token
pub fn exec_command(test: &[String]) -> Vec<String> {
    let rest = match test.first().map(String::as_str) {
        Some("CMD") | Some("CMD-SHELL") => &test[1..],
        _ => test,
    };
    match rest {
        [single] => split_shell_words(single),
        _ => rest.to_vec(),
    }
}

/// Whole seconds, omitting zero (Kubernetes rejects zero periods and timeouts)
fn seconds(d: Option<std::time::Duration>) -> Option<i32> {
    d.map(|d| i32::try_from(d.as_secs()).unwrap_or(i32::MAX))
        .filter(|s| *s > 0)
}

fn with_timing(mut probe: Probe, hc: Option<&HealthCheckConfig>) -> Probe {
    if let Some(hc) = hc {
        probe.period_seconds = seconds(hc.interval);
        probe.timeout_seconds = seconds(hc.timeout);
        probe.initial_delay_seconds = seconds(hc.start_period);
        probe.failure_threshold = hc
            .retries
            .filter(|r| *r > 0)
            .map(|r| i32::try_from(r).unwrap_or(i32::MAX));
    }
    probe
}

/// Build the probe used for both liveness and readiness.
///
/// `None` when health checks are disabled or nothing is declared. An
/// `http-health-check-path` directive replaces the exec check with an HTTP
/// GET that keeps only the timing fields.
pub fn compile_probe(unit: &ServiceUnit<'_>) -> Result<Option<Probe>> {
    let hc = unit.config.healthcheck.as_ref();
    if hc.is_some_and(HealthCheckConfig::is_disabled) {
        return Ok(None);
    }

    if let Some(path) = unit.directives.get(annotations::HTTP_HEALTH_CHECK_PATH) {
        let port = match unit.directives.port(annotations::HTTP_HEALTH_CHECK_PORT)? {
            Some(port) => port,
            None => unit
                .config
                .ports
                .iter()
                .find_map(|p| p.published)
                .unwrap_or(DEFAULT_HTTP_PROBE_PORT),
        };
        let probe = Probe {
            http_get: Some(HttpGetAction {
                path: path.to_string(),
                port,
            }),
            ..Default::default()
        };
        return Ok(Some(with_timing(probe, hc)));
    }

    let Some(hc) = hc else {
        return Ok(None);
    };
    let command = exec_command(&hc.test);
    if command.is_empty() {
        return Ok(None);
    }
    let probe = Probe {
        exec: Some(ExecAction { command }),
        ..Default::default()
    };
    Ok(Some(with_timing(probe, Some(hc))))
}
