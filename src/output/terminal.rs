// Colored terminal output for evaluations and indexed forums.
//
// This module handles all terminal-specific formatting: colors and tables.
// main.rs and status.rs delegate here.

use colored::Colorize;

use super::truncate_chars;
use crate::challenge::Evaluation;
use crate::db::models::{ChallengeTier, IndexedSubplebbit, SessionStatus};
use crate::risk::RiskFactor;

/// Display one evaluation: the verdict, then every factor.
pub fn display_evaluation(evaluation: &Evaluation) {
    let session = &evaluation.session;

    println!(
        "\n{}",
        format!("=== Risk Evaluation ({}) ===", session.subplebbit_address).bold()
    );
    println!();
    println!("  Author:     {}", session.author_address);
    println!(
        "  Risk score: {}",
        colorize_score(evaluation.risk.score)
    );
    println!("  Tier:       {}", colorize_tier(session.challenge_tier));
    println!("  Session:    {} ({})", session.session_id, colorize_status(session.status));
    println!();

    display_factors(&evaluation.risk.factors);
}

/// Display the factor breakdown of a risk score.
pub fn display_factors(factors: &[RiskFactor]) {
    println!(
        "  {:<26} {:>6}  {:>6}  {:>9}  {}",
        "Factor".dimmed(),
        "Score".dimmed(),
        "Weight".dimmed(),
        "Effective".dimmed(),
        "Explanation".dimmed(),
    );
    println!("  {}", "-".repeat(96).dimmed());

    for factor in factors {
        let explanation = truncate_chars(&factor.explanation, 50);
        if factor.effective_weight == 0.0 {
            let line = format!(
                "  {:<26} {:>6}  {:>6}  {:>9}  {}",
                factor.name.as_str(),
                "-",
                "-",
                "skipped",
                explanation
            );
            println!("{}", line.dimmed());
            continue;
        }

        println!(
            "  {:<26} {:>6}  {:>6.2}  {:>8.1}%  {}",
            factor.name.as_str(),
            colorize_score(factor.score),
            factor.weight,
            factor.effective_weight * 100.0,
            explanation
        );
    }
    println!();
}

/// Display the indexer's crawl list.
pub fn display_forums(forums: &[IndexedSubplebbit]) {
    if forums.is_empty() {
        println!("No forums indexed yet. Run `spamward add-subplebbit <address>` first.");
        return;
    }

    println!(
        "  {:<40} {:<20} {:>8}  {:>6}  {}",
        "Address".dimmed(),
        "Discovered via".dimmed(),
        "State".dimmed(),
        "Errors".dimmed(),
        "Last indexed".dimmed(),
    );
    println!("  {}", "-".repeat(96).dimmed());

    for forum in forums {
        let state = if forum.indexing_enabled {
            "enabled".green()
        } else {
            "disabled".red()
        };
        let errors = if forum.consecutive_errors > 0 {
            forum.consecutive_errors.to_string().yellow()
        } else {
            "0".normal()
        };
        let last_indexed = forum
            .last_indexed_at
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string());

        println!(
            "  {:<40} {:<20} {:>8}  {:>6}  {}",
            truncate_chars(&forum.address, 37),
            forum.discovered_via.as_str(),
            state,
            errors,
            last_indexed
        );
        if let Some(ref error) = forum.last_error {
            if forum.consecutive_errors > 0 {
                println!("      {}", truncate_chars(error, 90).dimmed());
            }
        }
    }
    println!();
}

pub fn format_timestamp(unix_secs: i64) -> String {
    chrono::DateTime::from_timestamp(unix_secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| unix_secs.to_string())
}

fn colorize_score(score: f64) -> colored::ColoredString {
    let text = format!("{score:.3}");
    match score {
        s if s >= 0.8 => text.red().bold(),
        s if s >= 0.4 => text.bright_red(),
        s if s >= 0.2 => text.yellow(),
        _ => text.green(),
    }
}

fn colorize_tier(tier: ChallengeTier) -> colored::ColoredString {
    match tier {
        ChallengeTier::AutoReject => tier.as_str().red().bold(),
        ChallengeTier::CaptchaAndOauth => tier.as_str().bright_red(),
        ChallengeTier::CaptchaOnly => tier.as_str().yellow(),
        ChallengeTier::AutoAccept => tier.as_str().green(),
    }
}

fn colorize_status(status: SessionStatus) -> colored::ColoredString {
    match status {
        SessionStatus::Completed => status.as_str().green(),
        SessionStatus::Failed => status.as_str().red(),
        SessionStatus::Pending => status.as_str().yellow(),
    }
}
