//! `toolguard doctor` — startup diagnostics. Grounded on
//! `gateway::cli::doctor::run`'s check-list-plus-summary shape, trimmed to
//! this gateway's actual dependencies (no chat memory, no LLM provider
//! registry).

use tg_domain::config::{Config, ConfigSeverity};

pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("toolguard doctor");
    println!("================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_store_dir(config, &mut all_passed);
    check_smart_rule_endpoint(config, &mut all_passed).await;

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists { config_path.to_owned() } else { format!("{config_path} not found (using defaults)") },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check("Config validation", error_count == 0, format!("{} issue(s) ({error_count} error(s))", issues.len()));
        for issue in &issues {
            println!("      [{:?}] {}", issue.severity, issue.message);
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_store_dir(config: &Config, all_passed: &mut bool) {
    let path = std::path::Path::new(&config.store.state_dir);
    let writable = std::fs::create_dir_all(path).is_ok() && {
        let probe = path.join(".toolguard_doctor_probe");
        let ok = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);
        ok
    };

    print_check(
        "Store directory writable",
        writable,
        if writable { path.display().to_string() } else { format!("{} (not writable)", path.display()) },
    );
    if !writable {
        *all_passed = false;
    }
}

/// Unreachable or unconfigured is only a warning: smart rules fall back to
/// the keyword-overlap heuristic on any transport failure.
async fn check_smart_rule_endpoint(config: &Config, _all_passed: &mut bool) {
    let Some(endpoint) = config.smart_rule.endpoint.as_ref() else {
        print_check("Smart-rule endpoint", true, "unset (keyword-overlap fallback only)".into());
        return;
    };

    let reachable = match reqwest::Client::builder().timeout(std::time::Duration::from_secs(5)).build() {
        Ok(client) => client.head(endpoint).send().await.is_ok(),
        Err(_) => false,
    };
    print_check("Smart-rule endpoint", reachable, if reachable { endpoint.clone() } else { format!("{endpoint} (unreachable, fallback will be used)") });
}

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
