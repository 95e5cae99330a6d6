use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use canvas_batch::batch::{run_batch, BatchItem, BatchOutcome, CancelToken};
use canvas_batch::canvas::model::{
    self, DiscussionKind, EnrollmentChange, EnrollmentState, UserIdentifier,
};
use canvas_batch::canvas::{self, CanvasClient, Record};
use canvas_batch::config::{self, Config};
use canvas_batch::progress::LogSink;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Skip the confirmation prompt before mutating
    #[arg(long, global = true)]
    yes: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish every unpublished course in an account
    PublishCourses {
        #[arg(long)]
        account: String,
        /// Restrict to courses matching the course search term
        #[arg(long)]
        search_term: Option<String>,
        /// Restrict to one enrollment term
        #[arg(long)]
        term: Option<String>,
    },
    /// Switch the threaded-reply setting of a course's discussion topics
    UpdateDiscussions {
        #[arg(long)]
        course: String,
        /// threaded or not_threaded
        #[arg(long)]
        mode: String,
    },
    /// Move enrollments of one role from one state to another
    UpdateEnrollments {
        #[arg(long)]
        course: String,
        /// Limit to one section instead of the whole course
        #[arg(long)]
        section: Option<String>,
        /// Enrollment role type, e.g. StudentEnrollment
        #[arg(long)]
        role: String,
        /// Current state: active, inactive, completed, or deleted
        #[arg(long)]
        from: String,
        /// Target: conclude, delete, inactivate, active, or inactive
        #[arg(long)]
        to: String,
        /// Also update enrollments that came from an SIS import
        #[arg(long)]
        include_sis: bool,
    },
    /// Print the configured identifier for a list of users
    AnnotateUsers {
        #[arg(long, value_delimiter = ',')]
        user_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let client = CanvasClient::from_config(&cfg)?;

    match args.command {
        Command::PublishCourses {
            account,
            search_term,
            term,
        } => {
            ensure_approved(&cfg)?;
            publish_courses(&client, &account, search_term, term, args.yes).await
        }
        Command::UpdateDiscussions { course, mode } => {
            ensure_approved(&cfg)?;
            update_discussions(&client, &course, &mode, args.yes).await
        }
        Command::UpdateEnrollments {
            course,
            section,
            role,
            from,
            to,
            include_sis,
        } => {
            ensure_approved(&cfg)?;
            update_enrollments(
                &client,
                &course,
                section.as_deref(),
                &role,
                &from,
                &to,
                include_sis,
                args.yes,
            )
            .await
        }
        Command::AnnotateUsers { user_ids } => {
            ensure_approved(&cfg)?;
            annotate_users(&client, cfg.app.user_identifier, &user_ids).await
        }
    }
}

fn ensure_approved(cfg: &Config) -> Result<()> {
    if !model::role_approved(&cfg.app.current_roles, &cfg.app.approved_roles) {
        bail!(
            "none of app.current_roles {:?} is in app.approved_roles {:?}",
            cfg.app.current_roles,
            cfg.app.approved_roles
        );
    }
    Ok(())
}

fn confirm_prompt(action: &str) -> bool {
    print!(
        "You are about to {action}. Do NOT interrupt the run while it is \
         processing or the process will not fully complete.\n\
         Type 'yes' to begin, anything else to cancel: "
    );
    let _ = io::stdout().flush();
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    let answer = line.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

fn print_records(records: &[&Record], fields: &[&str]) {
    for record in records {
        let id = model::record_id(record).unwrap_or_else(|| "?".into());
        let cells: Vec<String> = fields
            .iter()
            .map(|field| match record.get(*field) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        println!("{id}\t{}", cells.join("\t"));
    }
}

fn finish<P>(outcome: BatchOutcome, remaining: &[BatchItem<P>]) -> Result<()> {
    match outcome {
        BatchOutcome::Aborted => {
            info!("cancelled; no changes were made");
            return Ok(());
        }
        BatchOutcome::Cancelled { attempted } => info!(attempted, "stopped early"),
        BatchOutcome::Completed { succeeded, failed } => {
            info!(succeeded, failed, "batch finished")
        }
    }
    let failures: Vec<_> = remaining
        .iter()
        .filter(|item| item.error.is_some())
        .collect();
    for item in &failures {
        warn!(
            "still pending: [ID: {}] {}",
            item.id,
            item.error.as_deref().unwrap_or("")
        );
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} item(s) failed; re-run to retry them",
            failures.len()
        ))
    }
}

async fn publish_courses(
    client: &CanvasClient,
    account: &str,
    search_term: Option<String>,
    term: Option<String>,
    yes: bool,
) -> Result<()> {
    let mut request = canvas::account_courses(account);
    if let Some(query) = search_term {
        request = request.query("search_term", query);
    }
    if let Some(term_id) = term {
        request = request.query("enrollment_term_id", term_id);
    }

    let mut sink = LogSink;
    let records = client.fetch_all(&request, &mut sink).await;
    if records.is_empty() {
        info!("no unpublished courses matched");
        return Ok(());
    }
    print_records(
        &records.iter().collect::<Vec<_>>(),
        &["name", "course_code", "sis_course_id", "workflow_state"],
    );

    let mut items: Vec<BatchItem<()>> = records
        .iter()
        .filter_map(|record| model::record_id(record).map(|id| BatchItem::new(id, ())))
        .collect();
    let cancel = CancelToken::new();
    let outcome = run_batch(
        &mut items,
        |id, ()| {
            let client = client.clone();
            async move { client.publish_course(&id).await }
        },
        &mut sink,
        || yes || confirm_prompt("publish the selected courses"),
        &cancel,
        "course",
    )
    .await;
    finish(outcome, &items)
}

async fn update_discussions(
    client: &CanvasClient,
    course: &str,
    mode: &str,
    yes: bool,
) -> Result<()> {
    let mode = DiscussionKind::from_str(mode)?;
    let mut sink = LogSink;
    let records = client
        .fetch_all(&canvas::course_discussions(course), &mut sink)
        .await;

    let candidates: Vec<&Record> = records
        .iter()
        .filter(|record| {
            let current = record
                .get("discussion_type")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let replies = record
                .get("discussion_subentry_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            match mode {
                DiscussionKind::Threaded => current != "threaded",
                // topics that already have replies keep their threading
                DiscussionKind::NotThreaded => current == "threaded" && replies == 0,
            }
        })
        .collect();
    if candidates.is_empty() {
        info!("no discussions need updating");
        return Ok(());
    }
    print_records(&candidates, &["title", "discussion_type"]);

    let mut items: Vec<BatchItem<()>> = candidates
        .iter()
        .filter_map(|record| model::record_id(record).map(|id| BatchItem::new(id, ())))
        .collect();
    let cancel = CancelToken::new();
    let outcome = run_batch(
        &mut items,
        |id, ()| {
            let client = client.clone();
            let course = course.to_string();
            async move { client.update_discussion_type(&course, &id, mode).await }
        },
        &mut sink,
        || yes || confirm_prompt("update the threaded-reply setting of the selected discussions"),
        &cancel,
        "discussion",
    )
    .await;
    finish(outcome, &items)
}

#[allow(clippy::too_many_arguments)]
async fn update_enrollments(
    client: &CanvasClient,
    course: &str,
    section: Option<&str>,
    role: &str,
    from: &str,
    to: &str,
    include_sis: bool,
    yes: bool,
) -> Result<()> {
    let from_state = EnrollmentState::from_str(from)?;
    let request = match section {
        Some(section_id) => canvas::section_enrollments(section_id, role, from_state.as_str()),
        None => canvas::course_enrollments(course, role, from_state.as_str()),
    };

    let mut sink = LogSink;
    let records = client.fetch_all(&request, &mut sink).await;

    let mut items: Vec<BatchItem<EnrollmentChange>> = Vec::new();
    let mut listed = Vec::new();
    for record in &records {
        // SIS-managed enrollments are skipped unless explicitly included
        if !include_sis
            && record
                .get("sis_import_id")
                .map_or(false, |value| !value.is_null())
        {
            continue;
        }
        let Some(id) = model::record_id(record) else {
            continue;
        };
        let change = model::plan_enrollment_change(from_state, to, record)?;
        items.push(BatchItem::new(id, change));
        listed.push(record);
    }
    if items.is_empty() {
        info!("no enrollments matched");
        return Ok(());
    }
    print_records(&listed, &["user_id", "role", "enrollment_state"]);

    let cancel = CancelToken::new();
    let outcome = run_batch(
        &mut items,
        |id, change| {
            let client = client.clone();
            let course = course.to_string();
            async move {
                match change {
                    EnrollmentChange::End(task) => {
                        client.end_enrollment(&course, &id, task).await
                    }
                    EnrollmentChange::Reactivate => {
                        client.reactivate_enrollment(&course, &id).await
                    }
                    EnrollmentChange::Add(params) => {
                        client.add_enrollment(&course, &params).await
                    }
                }
            }
        },
        &mut sink,
        || yes || confirm_prompt("update the selected enrollments"),
        &cancel,
        "enrollment",
    )
    .await;
    finish(outcome, &items)
}

async fn annotate_users(
    client: &CanvasClient,
    which: UserIdentifier,
    user_ids: &[String],
) -> Result<()> {
    if user_ids.is_empty() {
        bail!("--user-ids is empty");
    }
    for user_id in user_ids {
        match client.user_profile(user_id).await {
            Ok(profile) => {
                let value = model::identifier_of(&profile, which)
                    .unwrap_or_else(|| format!("Missing {}", which.label()));
                let name = profile
                    .get("short_name")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                println!("{user_id}\t{name}\t{value}");
            }
            Err(err) => warn!(%user_id, "failed to fetch profile: {err:#}"),
        }
    }
    Ok(())
}
