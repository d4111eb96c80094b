//! `edison` CLI: a thin dispatch layer over `edison_core`. Every
//! subcommand supports `--json` for machine consumption; text mode is
//! the default for a human at a terminal.

use clap::{Parser, Subcommand};
use colored::Colorize;
use edison_core::core::{assets, config, path};
use edison_core::core::value::Value;
use edison_core::{context_payload, evidence, rules, session, task_index, validation_policy, vendor, workflow, EdisonError};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(
    name = "edison",
    version = env!("CARGO_PKG_VERSION"),
    about = "Edison coordinates AI coding agents working inside a real source repository."
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
    /// Emit machine-readable JSON instead of human text.
    #[clap(long, global = true)]
    json: bool,
    /// Override project root discovery.
    #[clap(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scaffold the management directory for a new or existing repo.
    Init {
        path: Option<PathBuf>,
        #[clap(long)]
        force: bool,
    },
    /// Session lifecycle operations.
    Session(SessionArgs),
    /// Task workflow operations.
    Task(TaskArgs),
    /// QA workflow operations.
    Qa(QaArgs),
    /// Evidence capture and inspection.
    Evidence(EvidenceArgs),
    /// Meta-worktree git operations.
    Git(GitArgs),
    /// Rules registry operations.
    Rules(RulesArgs),
    /// Layered content composition.
    Compose(ComposeArgs),
    /// Vendor cache and mount management.
    Vendor(VendorArgs),
    /// One-shot migrations.
    Migrate(MigrateArgs),
}

#[derive(clap::Args, Debug)]
struct SessionArgs {
    #[clap(subcommand)]
    command: SessionCommand,
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    New { id: String, #[clap(long, default_value = "main")] base: String },
    Start { id: String },
    Status { id: String },
    Complete { id: String },
    Context { id: Option<String>, #[clap(long)] task: Option<String> },
    Next { id: Option<String>, #[clap(long)] task: Option<String> },
}

#[derive(clap::Args, Debug)]
struct TaskArgs {
    #[clap(subcommand)]
    command: TaskCommand,
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    Claim { id: String, #[clap(long)] session: String },
    Status { id: String },
    List {
        #[clap(long)]
        session: Option<String>,
        #[clap(long)]
        state: Option<String>,
    },
    New { title: String, #[clap(long)] id: String, #[clap(long, default_value = "todo")] state: String },
    Link { id: String, #[clap(long)] depends_on: String },
    Similar { id: String },
}

#[derive(clap::Args, Debug)]
struct QaArgs {
    #[clap(subcommand)]
    command: QaCommand,
}

#[derive(Subcommand, Debug)]
enum QaCommand {
    New { task_id: String },
    Promote { id: String },
}

#[derive(clap::Args, Debug)]
struct EvidenceArgs {
    #[clap(subcommand)]
    command: EvidenceCommand,
}

#[derive(Subcommand, Debug)]
enum EvidenceCommand {
    Capture {
        task_id: String,
        #[clap(long)]
        only: Vec<String>,
        #[clap(long)]
        all: bool,
        #[clap(long)]
        preset: Option<String>,
        #[clap(long)]
        force: bool,
    },
    Status { task_id: String },
    Context7(Context7Args),
}

#[derive(clap::Args, Debug)]
struct Context7Args {
    #[clap(subcommand)]
    command: Context7Command,
}

#[derive(Subcommand, Debug)]
enum Context7Command {
    Template { task_id: String },
    Save { task_id: String, #[clap(long)] body: String },
}

#[derive(clap::Args, Debug)]
struct GitArgs {
    #[clap(subcommand)]
    command: GitCommand,
}

#[derive(Subcommand, Debug)]
enum GitCommand {
    WorktreeMetaInit { #[clap(long, default_value = "main")] base: String },
    MetaStatus,
    MetaCommit { #[clap(short = 'm', long)] message: String, paths: Vec<String> },
}

#[derive(clap::Args, Debug)]
struct RulesArgs {
    #[clap(subcommand)]
    command: RulesCommand,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    Inject {
        #[clap(long)]
        role: String,
        #[clap(long)]
        task: Option<String>,
        #[clap(long)]
        state: Option<String>,
        #[clap(long)]
        category: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct ComposeArgs {
    content_type: String,
    name: Option<String>,
}

#[derive(clap::Args, Debug)]
struct VendorArgs {
    #[clap(subcommand)]
    command: VendorCommand,
}

#[derive(Subcommand, Debug)]
enum VendorCommand {
    List,
    Show { name: String },
    Sync,
    Update { name: Option<String> },
    Gc,
}

#[derive(clap::Args, Debug)]
struct MigrateArgs {
    #[clap(subcommand)]
    command: MigrateCommand,
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    TaskFrontmatter,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(value) => {
            emit_success(&cli, value);
            ExitCode::SUCCESS
        }
        Err(err) => {
            emit_error(&cli, &err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn emit_success(cli: &Cli, value: serde_json::Value) {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&json!({"success": true, "data": value})).unwrap());
        return;
    }
    match value {
        serde_json::Value::String(s) => println!("{s}"),
        serde_json::Value::Null => {}
        other => println!("{}", serde_json::to_string_pretty(&other).unwrap()),
    }
}

fn emit_error(cli: &Cli, err: &EdisonError) {
    if cli.json {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "success": false,
                "error": {"code": err.code(), "error": err.to_string()},
            }))
            .unwrap()
        );
    } else {
        eprintln!("{} {}", "error:".red().bold(), err);
    }
}

fn project_root(cli: &Cli) -> edison_core::Result<PathBuf> {
    path::resolve_project_root(cli.root.as_deref(), None)
}

fn load_cfg(root: &std::path::Path) -> Value {
    config::load_config(root, true)
}

fn run(cli: &Cli) -> edison_core::Result<serde_json::Value> {
    match &cli.command {
        Command::Init { path: init_path, force } => cmd_init(init_path.as_deref(), *force),
        Command::Session(args) => cmd_session(cli, args),
        Command::Task(args) => cmd_task(cli, args),
        Command::Qa(args) => cmd_qa(cli, args),
        Command::Evidence(args) => cmd_evidence(cli, args),
        Command::Git(args) => cmd_git(cli, args),
        Command::Rules(args) => cmd_rules(cli, args),
        Command::Compose(args) => cmd_compose(cli, args),
        Command::Vendor(args) => cmd_vendor(cli, args),
        Command::Migrate(args) => cmd_migrate(cli, args),
    }
}

fn cmd_init(init_path: Option<&std::path::Path>, force: bool) -> edison_core::Result<serde_json::Value> {
    let root = init_path.map(Path::to_path_buf).unwrap_or(std::env::current_dir()?);
    let mgmt = path::management_root(&root);
    let cfg_dir = path::project_config_dir(&root);

    if mgmt.is_dir() && !force {
        return Err(EdisonError::Internal(format!(
            "{} already exists; pass --force to re-initialize",
            mgmt.display()
        )));
    }

    for sub in ["tasks", "qa", "sessions"] {
        std::fs::create_dir_all(mgmt.join(sub))?;
    }
    for sub in ["config", "agents", "validators", "guidelines", "constitutions", "packs", "_generated"] {
        std::fs::create_dir_all(cfg_dir.join(sub))?;
    }
    let defaults = assets::read_embedded_string("config/defaults.yaml").unwrap_or_default();
    std::fs::write(cfg_dir.join("config").join("defaults.yaml"), defaults)?;

    Ok(json!({"initialized": root.display().to_string()}))
}

fn cmd_session(cli: &Cli, args: &SessionArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    let cfg = load_cfg(&root);
    match &args.command {
        SessionCommand::New { id, base } => {
            let s = session::create_session(&root, &cfg, id, base)?;
            Ok(s.to_value().to_json_value())
        }
        SessionCommand::Start { id } => {
            let s = session::transition_session(&root, id, "active")?;
            Ok(s.to_value().to_json_value())
        }
        SessionCommand::Status { id } => {
            let s = session::load_session(&root, id)?;
            Ok(s.to_value().to_json_value())
        }
        SessionCommand::Complete { id } => {
            let s = workflow::complete_session(&root, &cfg, id)?;
            Ok(s.to_value().to_json_value())
        }
        SessionCommand::Context { id, task } => {
            let payload = context_payload::build_context(&root, &cfg, id.as_deref(), task.as_deref());
            Ok(serde_json::Value::String(context_payload::render_markdown(&payload, &cfg)))
        }
        SessionCommand::Next { id, task } => {
            let payload = context_payload::build_context(&root, &cfg, id.as_deref(), task.as_deref());
            Ok(serde_json::Value::String(context_payload::render_next(&payload, &cfg)))
        }
    }
}

fn task_json(t: &edison_core::entity::Task) -> serde_json::Value {
    json!({
        "id": t.id,
        "title": t.title,
        "state": t.state,
        "sessionId": t.session_id,
        "parentId": t.parent_id,
        "childIds": t.child_ids,
        "dependsOn": t.depends_on,
        "blocksTasks": t.blocks_tasks,
        "owner": t.owner,
        "createdAt": t.created_at,
        "updatedAt": t.updated_at,
    })
}

fn cmd_task(cli: &Cli, args: &TaskArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    let cfg = load_cfg(&root);
    match &args.command {
        TaskCommand::Claim { id, session } => {
            let (task, _qa) = workflow::claim_task(&root, &cfg, id, session)?;
            Ok(task_json(&task))
        }
        TaskCommand::Status { id } => {
            let idx = task_index::build_index(&root, &cfg);
            let task = idx.find_task(id).ok_or_else(|| EdisonError::NotFound(id.clone()))?;
            Ok(task_json(task))
        }
        TaskCommand::List { session, state } => {
            let idx = task_index::build_index(&root, &cfg);
            let tasks: Vec<serde_json::Value> = idx
                .tasks
                .iter()
                .filter(|t| session.as_deref().map(|s| t.session_id.as_deref() == Some(s)).unwrap_or(t.session_id.is_none()))
                .filter(|t| state.as_deref().map(|s| t.state == s).unwrap_or(true))
                .map(task_json)
                .collect();
            Ok(serde_json::Value::Array(tasks))
        }
        TaskCommand::New { title, id, state } => {
            let states = config::section(&cfg, "task").get_subsection("states").as_map().map(|m| m.keys().cloned().collect()).unwrap_or_default();
            let repo = edison_core::entity::task_repository(path::tasks_root(&root), states);
            let mut task = edison_core::entity::Task::new(id.clone(), title.clone(), state);
            repo.save(&mut task, "created", "system")?;
            Ok(task_json(&task))
        }
        TaskCommand::Link { id, depends_on } => {
            let states = config::section(&cfg, "task").get_subsection("states").as_map().map(|m| m.keys().cloned().collect()).unwrap_or_default();
            let repo = edison_core::entity::task_repository(path::tasks_root(&root), states);
            let mut task = repo.get(id)?.ok_or_else(|| EdisonError::NotFound(id.clone()))?;
            task.depends_on.push(depends_on.clone());
            repo.save(&mut task, "linked", "system")?;
            Ok(task_json(&task))
        }
        TaskCommand::Similar { id } => {
            let idx = task_index::build_index(&root, &cfg);
            let target = idx.find_task(id).ok_or_else(|| EdisonError::NotFound(id.clone()))?;
            let words: Vec<&str> = target.title.split_whitespace().collect();
            let similar: Vec<serde_json::Value> = idx
                .tasks
                .iter()
                .filter(|t| t.id != target.id)
                .filter(|t| words.iter().any(|w| t.title.contains(w)))
                .map(task_json)
                .collect();
            Ok(serde_json::Value::Array(similar))
        }
    }
}

fn qa_json(q: &edison_core::entity::Qa) -> serde_json::Value {
    json!({
        "id": q.id,
        "taskId": q.task_id,
        "state": q.state,
        "sessionId": q.session_id,
        "owner": q.owner,
        "createdAt": q.created_at,
        "updatedAt": q.updated_at,
    })
}

fn cmd_qa(cli: &Cli, args: &QaArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    let cfg = load_cfg(&root);
    match &args.command {
        QaCommand::New { task_id } => {
            let states = config::section(&cfg, "qa").get_subsection("states").as_map().map(|m| m.keys().cloned().collect()).unwrap_or_default();
            let repo = edison_core::entity::qa_repository(path::qa_root(&root), states);
            let mut qa = edison_core::entity::Qa::new(task_id, "pending");
            repo.save(&mut qa, "created", "system")?;
            Ok(qa_json(&qa))
        }
        QaCommand::Promote { id } => {
            let task_id = path::task_id_for(id);
            let task = workflow::validate_task(&root, &cfg, task_id)?;
            Ok(task_json(&task))
        }
    }
}

fn cmd_evidence(cli: &Cli, args: &EvidenceArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    let cfg = load_cfg(&root);
    match &args.command {
        EvidenceCommand::Capture { task_id, only, all, preset, force } => {
            let idx = task_index::build_index(&root, &cfg);
            let task = idx.find_task(task_id).ok_or_else(|| EdisonError::NotFound(task_id.clone()))?;
            let changed_files: Vec<String> = Vec::new();
            let policy = validation_policy::resolve_policy(&cfg, preset.as_deref(), &changed_files)?;
            let required = if *all { policy.preset.required_evidence.clone() } else if only.is_empty() { policy.preset.required_evidence.clone() } else { only.clone() };

            let key = evidence::current_snapshot_key(&root, Duration::from_secs(10));
            let snap_dir = evidence::snapshot_dir(&root, task_id, &key);
            let status = evidence::snapshot_status(&snap_dir, &required);
            if status.complete && status.passed && status.valid && !force {
                return Ok(json!({"reusedSnapshot": true, "round": evidence::current_round(&root, task_id)}));
            }

            let round = evidence::current_round(&root, task_id) + 1;
            let dir = evidence::round_dir(&root, task_id, round);
            std::fs::create_dir_all(&dir)?;

            let context = evidence::flatten_template_context(task);
            let hmac_env = config::section(&cfg, "validation").get_subsection("evidence").get_path("hmac_key_env").and_then(Value::as_str).map(str::to_string);
            let hmac_key = hmac_env.and_then(|name| std::env::var(name).ok());

            let mut written = Vec::new();
            for logical_name in &required {
                let command_group = logical_name.clone();
                let template = config::section(&cfg, "validation")
                    .get_subsection("evidence")
                    .get_subsection("commands")
                    .get_path(&command_group)
                    .and_then(Value::as_str)
                    .unwrap_or("true")
                    .to_string();
                let command = evidence::render_command_template(&template, &context);
                let lock = evidence::evidence_lock_path(&root, task_id, &command_group);
                let params = edison_core::core::atomic_io::LockParams::default();
                let result = edison_core::command_runner::run_locked(
                    &evidence::round_dir(&root, task_id, round),
                    &command_group,
                    None,
                    &command,
                    &root,
                    Duration::from_secs(600),
                    params,
                )?;
                let ev = evidence::new_evidence(task_id, round, logical_name, &command, &root.display().to_string(), result.exit_code, result.started_at, result.output);
                let file_name = evidence::evidence_file_name(&cfg, logical_name);
                let path = evidence::write_command_evidence(&dir, &file_name, &ev, hmac_key.as_deref().map(str::as_bytes))?;
                if result.exit_code != 0 {
                    return Err(EdisonError::RequiredCommandFailed { command: logical_name.clone(), exit_code: result.exit_code });
                }
                written.push(path.display().to_string());
            }

            let missing = evidence::validate_command_evidence_files(&dir, &required);
            if !missing.is_empty() {
                return Err(EdisonError::MissingRequiredEvidence(missing));
            }
            Ok(json!({"round": round, "files": written}))
        }
        EvidenceCommand::Status { task_id } => {
            let key = evidence::current_snapshot_key(&root, Duration::from_secs(10));
            let snap_dir = evidence::snapshot_dir(&root, task_id, &key);
            let required = config::section(&cfg, "validation").get_subsection("presets").get_subsection("quick").string_list("required_evidence");
            let status = evidence::snapshot_status(&snap_dir, &required);
            Ok(json!({"complete": status.complete, "passed": status.passed, "valid": status.valid}))
        }
        EvidenceCommand::Context7(sub) => match &sub.command {
            Context7Command::Template { task_id } => {
                let idx = task_index::build_index(&root, &cfg);
                let task = idx.find_task(task_id).ok_or_else(|| EdisonError::NotFound(task_id.clone()))?;
                let context = evidence::flatten_template_context(task);
                Ok(json!(context))
            }
            Context7Command::Save { task_id, body } => {
                let round = evidence::current_round(&root, task_id);
                let dir = evidence::round_dir(&root, task_id, round.max(1));
                std::fs::create_dir_all(&dir)?;
                let path = dir.join("context7-notes.md");
                std::fs::write(&path, body)?;
                Ok(json!({"path": path.display().to_string()}))
            }
        },
    }
}

fn cmd_git(cli: &Cli, args: &GitArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    let cfg = load_cfg(&root);
    match &args.command {
        GitCommand::WorktreeMetaInit { base } => {
            session::worktree_meta_init(&root, &cfg, base)?;
            Ok(json!({"initialized": true}))
        }
        GitCommand::MetaStatus => {
            let clean = session::meta_status(&root, &cfg)?;
            Ok(json!({"clean": clean}))
        }
        GitCommand::MetaCommit { message, paths } => {
            let sha = session::meta_commit(&root, &cfg, message, paths)?;
            Ok(json!({"commit": sha}))
        }
    }
}

fn cmd_rules(cli: &Cli, args: &RulesArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    let cfg = load_cfg(&root);
    match &args.command {
        RulesCommand::Inject { role, task, state, category } => {
            let registry = rules::load_registry(&root, &cfg);
            let transition = state.as_deref().map(|s| rules::canonical_transition(&cfg, s));
            let selected = rules::select_rules(&registry, role, category.as_deref(), transition.as_deref());
            let markdown = rules::render_markdown(&selected);
            let rules_json: Vec<serde_json::Value> = selected
                .iter()
                .enumerate()
                .map(|(i, r)| json!({"id": r.id, "title": r.title, "content": r.guidance, "priority": i}))
                .collect();
            Ok(json!({
                "sessionId": serde_json::Value::Null,
                "taskId": task,
                "contexts": [],
                "rules": rules_json,
                "injection": markdown,
            }))
        }
    }
}

fn cmd_compose(cli: &Cli, args: &ComposeArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    let cfg = load_cfg(&root);
    match &args.name {
        Some(name) => {
            let text = edison_core::composition::compose(&args.content_type, name, &root, &cfg)?;
            Ok(serde_json::Value::String(text))
        }
        None => {
            let content_types: Vec<&str> = if args.content_type == "all" {
                vec!["agents", "validators", "guidelines"]
            } else {
                vec![args.content_type.as_str()]
            };
            let mut written = Vec::new();
            for ct in content_types {
                let composed = edison_core::composition::compose_all(ct, &root, &cfg)?;
                let out_dir = path::project_config_dir(&root).join("_generated").join(ct);
                std::fs::create_dir_all(&out_dir)?;
                for (name, text) in composed {
                    let p = out_dir.join(format!("{name}.md"));
                    std::fs::write(&p, text)?;
                    written.push(p.display().to_string());
                }
            }
            Ok(json!({"generated": written}))
        }
    }
}

fn cmd_vendor(cli: &Cli, args: &VendorArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    match &args.command {
        VendorCommand::List => {
            let cfg = vendor::VendorConfig::load(&root)?;
            let sources = cfg.sources()?;
            Ok(json!(sources.iter().map(|s| &s.name).collect::<Vec<_>>()))
        }
        VendorCommand::Show { name } => {
            let cfg = vendor::VendorConfig::load(&root)?;
            let sources = cfg.sources()?;
            let source = sources.iter().find(|s| &s.name == name).ok_or_else(|| EdisonError::NotFound(name.clone()))?;
            Ok(json!({"name": source.name, "url": source.url, "ref": source.git_ref, "path": source.path}))
        }
        VendorCommand::Sync => {
            let cfg = vendor::VendorConfig::load(&root)?;
            let cache_dir = cfg.cache_dir()?;
            let mut lock = vendor::VendorLock::load(&root)?;
            let mut mounted = Vec::new();
            for source in cfg.sources()? {
                let commit = vendor::resolve_commit(&source, &cache_dir, Duration::from_secs(120))?;
                vendor::mount(&source, &cache_dir, &root)?;
                lock.add_entry(vendor::VendorLockEntry::new(&source.name, &source.url, &source.git_ref, &commit, &source.path));
                mounted.push(source.name.clone());
            }
            lock.save()?;
            Ok(json!({"synced": mounted}))
        }
        VendorCommand::Update { name } => {
            let cfg = vendor::VendorConfig::load(&root)?;
            let cache_dir = cfg.cache_dir()?;
            let mut lock = vendor::VendorLock::load(&root)?;
            let mut updated = Vec::new();
            for source in cfg.sources()? {
                if name.as_deref().map(|n| n != source.name).unwrap_or(false) {
                    continue;
                }
                let commit = vendor::resolve_commit(&source, &cache_dir, Duration::from_secs(120))?;
                vendor::mount(&source, &cache_dir, &root)?;
                lock.add_entry(vendor::VendorLockEntry::new(&source.name, &source.url, &source.git_ref, &commit, &source.path));
                updated.push(source.name.clone());
            }
            lock.save()?;
            Ok(json!({"updated": updated}))
        }
        VendorCommand::Gc => {
            let cfg = vendor::VendorConfig::load(&root)?;
            let cache_dir = cfg.cache_dir()?;
            let sources = cfg.sources()?;
            let mut removed = Vec::new();
            if let Ok(entries) = std::fs::read_dir(&cache_dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if !sources.iter().any(|s| s.name == name) {
                        std::fs::remove_dir_all(entry.path())?;
                        removed.push(name);
                    }
                }
            }
            Ok(json!({"removed": removed}))
        }
    }
}

fn cmd_migrate(cli: &Cli, args: &MigrateArgs) -> edison_core::Result<serde_json::Value> {
    let root = project_root(cli)?;
    let cfg = load_cfg(&root);
    match &args.command {
        MigrateCommand::TaskFrontmatter => {
            let states: Vec<String> = config::section(&cfg, "task").get_subsection("states").as_map().map(|m| m.keys().cloned().collect()).unwrap_or_default();
            let mut migrated = Vec::new();
            for state in &states {
                let dir = path::tasks_root(&root).join(state);
                let Ok(entries) = std::fs::read_dir(&dir) else { continue };
                for entry in entries.flatten() {
                    let p = entry.path();
                    if p.extension().and_then(|e| e.to_str()) != Some("md") {
                        continue;
                    }
                    let text = std::fs::read_to_string(&p)?;
                    if text.trim_start().starts_with("---") {
                        continue;
                    }
                    if let Some(legacy) = parse_html_comment_frontmatter(&text) {
                        let body = text.trim_start();
                        let rendered = edison_core::entity::render_frontmatter_document(&legacy, body)?;
                        std::fs::write(&p, rendered)?;
                        migrated.push(p.display().to_string());
                    }
                }
            }
            Ok(json!({"migrated": migrated}))
        }
    }
}

/// Parse a legacy `<!-- key: value -->` comment-block frontmatter into a
/// [`Value`] map, one entry per comment line, stopping at the first
/// non-comment line.
fn parse_html_comment_frontmatter(text: &str) -> Option<Value> {
    let mut map = Value::map();
    let mut found_any = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(inner) = trimmed.strip_prefix("<!--").and_then(|s| s.strip_suffix("-->")) {
            if let Some((key, value)) = inner.trim().split_once(':') {
                map.set_path(key.trim(), Value::String(value.trim().to_string()));
                found_any = true;
                continue;
            }
        }
        break;
    }
    if found_any {
        Some(map)
    } else {
        None
    }
}
