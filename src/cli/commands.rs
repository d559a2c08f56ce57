//! Command implementations for the CLI
//!
//! SBIO pattern: plan parsing and summaries are pure; the async runners talk
//! to platforms and return data, printing is left to the caller.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use super::display::*;
use super::{Cli, Commands, ContextAction};
use crate::bridge::{BridgeConfig, ClusterRef, IdentityBridge};
use crate::context::{self, Config, Context, ContextError};
use crate::error::ReconcileError;
use crate::platform::{
    HttpPlatform, MemoryPlatform, ObjectRef, Platform, PlatformError, PlatformFamily,
    RemoteObject, ResourceKind,
};
use crate::poll::{wait_for, Predicate, WaitCondition, WaitOutcome};
use crate::reconcile::{
    ChildSet, CompositeDescriptor, ProgressLedger, Reconciler, ResourceDescriptor,
};
use crate::sequence::Sequencer;

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Step {index} ({name}) failed: {source}")]
    Step {
        index: usize,
        name: String,
        source: ReconcileError,
    },
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Context Commands (Pure business logic)
// ============================================================================

/// Info about a context for display
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub name: String,
    pub url: String,
    pub platform: PlatformFamily,
    pub is_current: bool,
}

/// List all contexts
pub fn context_list(config: &Config) -> Vec<ContextInfo> {
    let current = config.current_context.as_deref();
    context::list_contexts(config)
        .into_iter()
        .filter_map(|name| config.contexts.get(name))
        .map(|ctx| ContextInfo {
            name: ctx.name.clone(),
            url: ctx.url.clone(),
            platform: ctx.platform,
            is_current: Some(ctx.name.as_str()) == current,
        })
        .collect()
}

/// Get current context name and URL
pub fn context_current(config: &Config) -> CommandResult<(String, String)> {
    let ctx = config.context(None)?;
    Ok((ctx.name.clone(), ctx.url.clone()))
}

/// Switch to a context
pub fn context_use(config: &mut Config, name: &str) -> CommandResult<()> {
    context::set_current_context(config, name)?;
    Ok(())
}

/// Add a new context; the first one added becomes current
pub fn context_add(config: &mut Config, ctx: Context) {
    let name = ctx.name.clone();
    context::add_context(config, ctx);
    if config.current_context.is_none() {
        config.current_context = Some(name);
    }
}

/// Delete a context
pub fn context_delete(config: &mut Config, name: &str) -> bool {
    context::remove_context(config, name).is_some()
}

// ============================================================================
// Plan parsing
// ============================================================================

/// One step of a plan file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanStep {
    #[serde(flatten)]
    pub resource: ResourceDescriptor,

    /// Children owned by this resource
    #[serde(default)]
    pub children: Option<ChildSet>,

    /// Shorthand for security group rule children
    #[serde(default)]
    pub rules: Vec<Value>,
}

/// How a step is reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Ensure,
    Upsert,
    Composite,
}

impl PlanStep {
    pub fn mode(&self) -> ApplyMode {
        if self.child_set().is_some() {
            ApplyMode::Composite
        } else if self.resource.kind.is_versioned() {
            ApplyMode::Upsert
        } else {
            ApplyMode::Ensure
        }
    }

    pub fn child_set(&self) -> Option<ChildSet> {
        match (&self.children, self.rules.is_empty()) {
            (Some(children), _) => Some(children.clone()),
            (None, false) => Some(ChildSet::security_group_rules(self.rules.clone())),
            (None, true) => None,
        }
    }
}

/// Parse a plan; YAML when `yaml` is set, JSON otherwise
pub fn parse_plan(content: &str, yaml: bool) -> CommandResult<Vec<PlanStep>> {
    let steps: Vec<PlanStep> = if yaml {
        serde_yaml::from_str(content).map_err(|e| CommandError::Plan(e.to_string()))?
    } else {
        serde_json::from_str(content).map_err(|e| CommandError::Plan(e.to_string()))?
    };

    for (index, step) in steps.iter().enumerate() {
        if step.children.is_some() && !step.rules.is_empty() {
            return Err(CommandError::Plan(format!(
                "step {} ({}): use either 'children' or 'rules', not both",
                index + 1,
                step.resource.name
            )));
        }
        if !step.rules.is_empty() && step.resource.kind != ResourceKind::SecurityGroup {
            return Err(CommandError::Plan(format!(
                "step {} ({}): 'rules' only apply to security groups",
                index + 1,
                step.resource.name
            )));
        }
    }
    Ok(steps)
}

/// Load a plan file
pub fn load_plan(path: &Path) -> CommandResult<Vec<PlanStep>> {
    let content = std::fs::read_to_string(path)?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    parse_plan(&content, yaml)
}

/// Fill in the context's namespace for namespaced kinds that name none
pub fn with_default_namespace(mut desc: ResourceDescriptor, ctx: &Context) -> ResourceDescriptor {
    if desc.namespace.is_none() && desc.kind.is_namespaced() {
        desc.namespace = ctx.namespace.clone();
    }
    desc
}

/// Build a wait predicate from the wait command's flags
pub fn predicate_from_args(
    status: Option<&str>,
    field: Option<&str>,
    present: Option<&str>,
    absent: bool,
) -> CommandResult<Predicate> {
    match (status, field, present, absent) {
        (Some(status), None, None, false) => Ok(Predicate::status(status)),
        (None, Some(field), None, false) => {
            let (pointer, raw) = field.split_once('=').ok_or_else(|| {
                CommandError::Argument(format!("expected POINTER=VALUE, got '{}'", field))
            })?;
            if !pointer.starts_with('/') {
                return Err(CommandError::Argument(format!(
                    "'{}' is not a JSON pointer",
                    pointer
                )));
            }
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
            Ok(Predicate::field(pointer, value))
        }
        (None, None, Some(pointer), false) => Ok(Predicate::present(pointer)),
        (None, None, None, true) => Ok(Predicate::Absent),
        _ => Err(CommandError::Argument(
            "specify exactly one of --status, --field, --present, --absent".to_string(),
        )),
    }
}

// ============================================================================
// Session: platforms and reconcilers for one invocation
// ============================================================================

/// Connected reconcilers per context, sharing one sequencer and ledger
pub struct Session {
    config: Config,
    default_context: Option<String>,
    dry_run: bool,
    sequencer: Option<Arc<Sequencer>>,
    ledger: Arc<ProgressLedger>,
    reconcilers: HashMap<String, Reconciler>,
}

impl Session {
    pub fn new(config: Config, default_context: Option<String>) -> Self {
        Self {
            config,
            default_context,
            dry_run: false,
            sequencer: Some(Arc::new(Sequencer::new())),
            ledger: Arc::new(ProgressLedger::new()),
            reconcilers: HashMap::new(),
        }
    }

    /// Use empty in-memory platforms instead of connecting
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.sequencer = ordered.then(|| Arc::new(Sequencer::new()));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    /// The named context, the `--context` override, or the current one
    pub fn context(&self, name: Option<&str>) -> CommandResult<&Context> {
        let name = name.or(self.default_context.as_deref());
        Ok(self.config.context(name)?)
    }

    /// Namespace for a single-object command: the explicit one, else the
    /// default context's namespace for namespaced kinds
    fn namespace_for(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> CommandResult<Option<String>> {
        match namespace {
            Some(ns) => Ok(Some(ns.to_string())),
            None if kind.is_namespaced() => Ok(self.context(None)?.namespace.clone()),
            None => Ok(None),
        }
    }

    async fn platform_for(&self, ctx: &Context) -> CommandResult<Arc<dyn Platform>> {
        if self.dry_run {
            return Ok(Arc::new(MemoryPlatform::new(&ctx.name)));
        }
        Ok(Arc::new(HttpPlatform::connect(ctx).await?))
    }

    fn reconciler_for(&self, platform: Arc<dyn Platform>) -> Reconciler {
        let reconciler = Reconciler::new(platform)
            .with_poll_defaults(self.config.polling.poll_defaults())
            .with_ledger(self.ledger.clone());
        match &self.sequencer {
            Some(sequencer) => reconciler.with_sequencer(sequencer.clone()),
            None => reconciler,
        }
    }

    /// Register a pre-built platform under a context name
    pub fn attach(&mut self, context: &str, platform: Arc<dyn Platform>) {
        let reconciler = self.reconciler_for(platform);
        self.reconcilers.insert(context.to_string(), reconciler);
    }

    /// Reconciler for a context, connecting on first use
    pub async fn reconciler(&mut self, name: Option<&str>) -> CommandResult<Reconciler> {
        let ctx = self.context(name)?.clone();
        if let Some(reconciler) = self.reconcilers.get(&ctx.name) {
            return Ok(reconciler.clone());
        }
        let platform = self.platform_for(&ctx).await?;
        let reconciler = self.reconciler_for(platform);
        self.reconcilers.insert(ctx.name.clone(), reconciler.clone());
        Ok(reconciler)
    }

    /// Connect every context a plan refers to, concurrently
    pub async fn prepare(&mut self, steps: &[PlanStep]) -> CommandResult<()> {
        let mut pending: Vec<Context> = Vec::new();
        let mut seen = HashSet::new();
        for step in steps {
            let ctx = self.context(step.resource.platform.as_deref())?;
            if !self.reconcilers.contains_key(&ctx.name) && seen.insert(ctx.name.clone()) {
                pending.push(ctx.clone());
            }
        }

        let this = &*self;
        let platforms = try_join_all(pending.iter().map(|ctx| this.platform_for(ctx))).await?;
        for (ctx, platform) in pending.iter().zip(platforms) {
            info!(context = %ctx.name, platform = %ctx.platform, "Context ready");
            self.attach(&ctx.name, platform);
        }
        Ok(())
    }
}

// ============================================================================
// Apply
// ============================================================================

/// Outcome of one plan step
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub index: usize,
    pub context: String,
    pub kind: ResourceKind,
    pub name: String,
    pub action: String,
    pub id: Option<String>,
    pub status: Option<String>,
}

impl StepReport {
    fn new(
        index: usize,
        context: &str,
        desc: &ResourceDescriptor,
        action: impl Into<String>,
        object: Option<&RemoteObject>,
    ) -> Self {
        Self {
            index,
            context: context.to_string(),
            kind: desc.kind,
            name: desc.name.clone(),
            action: action.into(),
            id: object.map(|o| o.id.clone()),
            status: object.and_then(|o| o.status.clone()),
        }
    }
}

/// Reconcile every step in order.
///
/// Non-fatal errors (stale version tokens) are logged and the run goes on;
/// the first fatal error stops the run.
pub async fn apply_plan(session: &mut Session, steps: Vec<PlanStep>) -> CommandResult<Vec<StepReport>> {
    session.prepare(&steps).await?;

    let mut reports = Vec::with_capacity(steps.len());
    for (offset, step) in steps.into_iter().enumerate() {
        let index = offset + 1;
        let ctx = session.context(step.resource.platform.as_deref())?.clone();
        let reconciler = session.reconciler(Some(&ctx.name)).await?;

        let mut desc = with_default_namespace(step.resource.clone(), &ctx);
        if session.dry_run {
            desc.wait = None;
        }
        info!(step = index, kind = %desc.kind, name = %desc.name, context = %ctx.name, "Applying");

        let result = match step.mode() {
            ApplyMode::Ensure => reconciler
                .ensure(&desc)
                .await
                .map(|object| ("ensured".to_string(), Some(object))),
            ApplyMode::Upsert => reconciler
                .upsert(&desc)
                .await
                .map(|outcome| (outcome.action().to_string(), Some(outcome.into_object()))),
            ApplyMode::Composite => {
                let children = step
                    .child_set()
                    .ok_or_else(|| CommandError::Plan(format!("step {} has no children", index)))?;
                let composite = CompositeDescriptor {
                    parent: desc.clone(),
                    children,
                };
                reconciler.ensure_composite(&composite).await.map(|report| {
                    (
                        format!("ensured (+{} children)", report.created),
                        Some(report.parent),
                    )
                })
            }
        };

        match result {
            Ok((action, object)) => {
                reports.push(StepReport::new(index, &ctx.name, &desc, action, object.as_ref()));
            }
            Err(e) if !e.is_fatal() => {
                warn!(step = index, name = %desc.name, error = %e, "Step did not apply, continuing");
                reports.push(StepReport::new(index, &ctx.name, &desc, "conflict", None));
            }
            Err(e) => {
                error!(step = index, kind = %desc.kind, name = %desc.name, error = %e, "Step failed");
                return Err(CommandError::Step {
                    index,
                    name: desc.name.clone(),
                    source: e,
                });
            }
        }
    }
    Ok(reports)
}

// ============================================================================
// Single-object commands
// ============================================================================

pub async fn resolve_object(
    session: &mut Session,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> CommandResult<Option<RemoteObject>> {
    let namespace = session.namespace_for(kind, namespace)?;
    let reconciler = session.reconciler(None).await?;
    Ok(reconciler.resolve(kind, namespace.as_deref(), name).await?)
}

/// Options of the wait command
#[derive(Debug, Clone)]
pub struct WaitRequest {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
    pub predicate: Predicate,
    pub timeout: Option<Duration>,
    pub interval: Option<Duration>,
    pub fail_on: Vec<String>,
}

/// Resolve `name` and wait on it. Waiting for absence of an object that
/// does not resolve succeeds at once.
pub async fn wait_object(session: &mut Session, request: WaitRequest) -> CommandResult<WaitOutcome> {
    if request.interval.is_some_and(|interval| interval.is_zero()) {
        return Err(CommandError::Argument("--interval must be at least 1 second".to_string()));
    }
    let namespace = session.namespace_for(request.kind, request.namespace.as_deref())?;
    let namespace = namespace.as_deref();
    let reconciler = session.reconciler(None).await?;

    let Some(object) = reconciler.resolve(request.kind, namespace, &request.name).await? else {
        if request.predicate == Predicate::Absent {
            return Ok(WaitOutcome::Absent);
        }
        return Err(ReconcileError::NotFound {
            kind: request.kind,
            name: request.name,
        }
        .into());
    };

    let defaults = reconciler.poll_defaults();
    let mut condition = WaitCondition::new(
        ObjectRef::new(request.kind, namespace, &object.id),
        request.predicate,
        &defaults,
    )
    .with_timeout(request.timeout.unwrap_or(defaults.timeout))
    .with_interval(request.interval.unwrap_or(defaults.interval));
    for status in request.fail_on {
        condition = condition.with_fail_on(status);
    }
    Ok(wait_for(reconciler.platform(), &condition).await?)
}

pub async fn delete_object(
    session: &mut Session,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
    wait: bool,
) -> CommandResult<bool> {
    let namespace = session.namespace_for(kind, namespace)?;
    let reconciler = session.reconciler(None).await?;
    Ok(reconciler.remove(kind, namespace.as_deref(), name, wait).await?)
}

async fn bridge(session: &mut Session, front_namespace: &str) -> CommandResult<IdentityBridge> {
    let reconciler = session.reconciler(None).await?;
    let config = BridgeConfig::from_polling(&session.config().polling)
        .with_front_namespace(front_namespace);
    Ok(IdentityBridge::new(reconciler.platform_arc())
        .with_config(config)
        .with_poll_defaults(reconciler.poll_defaults()))
}

pub async fn back_id(session: &mut Session, front: &str, front_namespace: &str) -> CommandResult<String> {
    let bridge = bridge(session, front_namespace).await?;
    Ok(bridge.back_id(&ClusterRef::Front(front.to_string())).await?)
}

pub async fn register_token(
    session: &mut Session,
    cluster: &ClusterRef,
    front_namespace: &str,
) -> CommandResult<RemoteObject> {
    let bridge = bridge(session, front_namespace).await?;
    Ok(bridge.ensure_registration_token(cluster).await?)
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run a parsed command line and return what should be printed
pub async fn execute(cli: Cli) -> CommandResult<String> {
    let config_path = cli.config.clone().unwrap_or_else(context::default_config_path);
    let mut config = context::load_config_from(&config_path)?;

    let action = match cli.command {
        Commands::Context(args) => args.action,
        command => {
            let session = Session::new(config, cli.context);
            return run_command(session, command).await;
        }
    };

    let output = match action {
        ContextAction::List => format_context_list(&context_list(&config)),
        ContextAction::Current => {
            let (name, url) = context_current(&config)?;
            format_current_context(&name, &url)
        }
        ContextAction::Use { name } => {
            context_use(&mut config, &name)?;
            context::save_config_to(&config, &config_path)?;
            format!("Switched to context '{}'\n", name)
        }
        ContextAction::Add {
            name,
            url,
            platform,
            token,
            namespace,
        } => {
            let mut ctx = Context::new(&name, url, platform);
            if let Some(token) = token {
                ctx = ctx.with_token(token);
            }
            if let Some(namespace) = namespace {
                ctx = ctx.with_namespace(namespace);
            }
            context_add(&mut config, ctx);
            context::save_config_to(&config, &config_path)?;
            format!("Context '{}' added\n", name)
        }
        ContextAction::Delete { name } => {
            if !context_delete(&mut config, &name) {
                return Err(ContextError::ContextNotFound(name).into());
            }
            context::save_config_to(&config, &config_path)?;
            format!("Context '{}' deleted\n", name)
        }
    };
    Ok(output)
}

async fn run_command(mut session: Session, command: Commands) -> CommandResult<String> {
    match command {
        Commands::Context(_) => Ok(String::new()),
        Commands::Resolve(args) => {
            let object =
                resolve_object(&mut session, args.kind, args.namespace.as_deref(), &args.name)
                    .await?;
            Ok(format_resolved(args.kind, &args.name, object.as_ref()))
        }
        Commands::Apply(args) => {
            let steps = load_plan(&args.file)?;
            info!(file = %args.file.display(), steps = steps.len(), "Loaded plan");
            let mut session = session.dry_run(args.dry_run).ordered(!args.unordered);
            let reports = apply_plan(&mut session, steps).await?;

            let mut output = format_step_reports(&reports);
            output.push_str(&format_ledger(&session.ledger().entries()));
            Ok(output)
        }
        Commands::Wait(args) => {
            let predicate = predicate_from_args(
                args.status.as_deref(),
                args.field.as_deref(),
                args.present.as_deref(),
                args.absent,
            )?;
            let request = WaitRequest {
                kind: args.kind,
                namespace: args.namespace,
                name: args.name.clone(),
                predicate,
                timeout: args.timeout.map(Duration::from_secs),
                interval: args.interval.map(Duration::from_secs),
                fail_on: args.fail_on,
            };
            let outcome = wait_object(&mut session, request).await?;
            Ok(format_wait_outcome(args.kind, &args.name, &outcome))
        }
        Commands::Delete(args) => {
            let deleted = delete_object(
                &mut session,
                args.kind,
                args.namespace.as_deref(),
                &args.name,
                args.wait,
            )
            .await?;
            Ok(format_deleted(args.kind, &args.name, deleted))
        }
        Commands::BackId(args) => {
            let id = back_id(&mut session, &args.front, &args.namespace).await?;
            Ok(format!("{}\n", id))
        }
        Commands::RegisterToken(args) => {
            let cluster = match (args.front, args.back) {
                (_, Some(back)) => ClusterRef::Back(back),
                (Some(front), None) => ClusterRef::Front(front),
                (None, None) => {
                    return Err(CommandError::Argument(
                        "one of --front or --back is required".to_string(),
                    ))
                }
            };
            let token = register_token(&mut session, &cluster, &args.namespace).await?;
            Ok(format_object_list(
                ResourceKind::RegistrationToken,
                std::slice::from_ref(&token),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Operation;
    use serde_json::json;

    fn config() -> Config {
        let mut config = Config::default();
        context_add(
            &mut config,
            Context::new("lab", "http://cloud.lab", PlatformFamily::OpenStack),
        );
        context_add(
            &mut config,
            Context::new("kube", "http://kube.lab", PlatformFamily::Kubernetes)
                .with_namespace("auth"),
        );
        config
    }

    #[test]
    fn test_first_context_becomes_current() {
        let config = config();
        assert_eq!(config.current_context.as_deref(), Some("lab"));
        let list = context_list(&config);
        assert_eq!(list.len(), 2);
        assert!(list.iter().any(|c| c.name == "lab" && c.is_current));
        assert!(list.iter().any(|c| c.name == "kube" && !c.is_current));
    }

    #[test]
    fn test_parse_plan_modes() {
        let plan = r#"
- name: net-a
  kind: network
- name: web
  kind: security-group
  rules:
    - {direction: ingress, protocol: tcp, port_range_min: 443, port_range_max: 443}
- name: tls
  kind: secret
  platform: kube
  spec:
    type: kubernetes.io/tls
"#;
        let steps = parse_plan(plan, true).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].mode(), ApplyMode::Ensure);
        assert_eq!(steps[1].mode(), ApplyMode::Composite);
        assert_eq!(steps[2].mode(), ApplyMode::Upsert);
        assert_eq!(steps[2].resource.platform.as_deref(), Some("kube"));
    }

    #[test]
    fn test_parse_plan_json() {
        let plan = r#"[{"name": "vm-1", "kind": "server", "wait": {"until": "status-equals", "value": "ACTIVE"}}]"#;
        let steps = parse_plan(plan, false).unwrap();
        assert_eq!(steps[0].resource.kind, ResourceKind::Server);
        assert!(steps[0].resource.wait.is_some());
    }

    #[test]
    fn test_rules_only_for_security_groups() {
        let plan = r#"
- name: net-a
  kind: network
  rules: [{direction: ingress}]
"#;
        assert!(matches!(parse_plan(plan, true), Err(CommandError::Plan(_))));
    }

    #[test]
    fn test_default_namespace() {
        let config = config();
        let kube = config.context(Some("kube")).unwrap();
        let desc = with_default_namespace(ResourceDescriptor::new(ResourceKind::Secret, "tls"), kube);
        assert_eq!(desc.namespace.as_deref(), Some("auth"));

        let desc =
            with_default_namespace(ResourceDescriptor::new(ResourceKind::Network, "net"), kube);
        assert_eq!(desc.namespace, None);
    }

    #[test]
    fn test_predicate_from_args() {
        assert_eq!(
            predicate_from_args(Some("ACTIVE"), None, None, false).unwrap(),
            Predicate::status("ACTIVE")
        );
        assert_eq!(
            predicate_from_args(None, Some("/status/ready=true"), None, false).unwrap(),
            Predicate::field("/status/ready", true)
        );
        assert_eq!(
            predicate_from_args(None, Some("/status/phase=Ready"), None, false).unwrap(),
            Predicate::field("/status/phase", "Ready")
        );
        assert!(predicate_from_args(None, Some("ready"), None, false).is_err());
        assert!(predicate_from_args(None, None, None, false).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_apply() {
        let steps = parse_plan(
            r#"
- name: net-a
  kind: network
- name: sub-a
  kind: subnet
  spec: {cidr: 10.0.0.0/24, ip_version: 4}
- name: web
  kind: security-group
  rules:
    - {direction: ingress, protocol: tcp, port_range_min: 22, port_range_max: 22}
    - {direction: ingress, protocol: tcp, port_range_min: 443, port_range_max: 443}
- name: tls
  kind: secret
  platform: kube
"#,
            true,
        )
        .unwrap();

        let mut session = Session::new(config(), None).dry_run(true).ordered(false);
        let reports = apply_plan(&mut session, steps).await.unwrap();

        let actions: Vec<&str> = reports.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["ensured", "ensured", "ensured (+2 children)", "created"]
        );
        assert_eq!(reports[3].context, "kube");
        assert_eq!(session.ledger().entries().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_stops_on_fatal_step() {
        let steps = parse_plan(
            r#"
- name: sub-a
  kind: subnet
- name: net-a
  kind: network
"#,
            true,
        )
        .unwrap();

        let mut session = Session::new(config(), None).dry_run(true);
        let err = apply_plan(&mut session, steps).await.unwrap_err();
        match err {
            CommandError::Step { index, source, .. } => {
                assert_eq!(index, 1);
                assert!(matches!(source, ReconcileError::OutOfOrder { .. }));
            }
            other => panic!("expected Step error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attached_platform_is_used() {
        let store = Arc::new(MemoryPlatform::new("lab"));
        store.insert(ResourceKind::Router, None, json!({"name": "edge", "status": "ACTIVE"}));

        let mut session = Session::new(config(), None);
        session.attach("lab", store.clone());

        let found = resolve_object(&mut session, ResourceKind::Router, None, "edge")
            .await
            .unwrap();
        assert_eq!(found.unwrap().status.as_deref(), Some("ACTIVE"));

        let outcome = wait_object(
            &mut session,
            WaitRequest {
                kind: ResourceKind::Router,
                namespace: None,
                name: "missing".into(),
                predicate: Predicate::Absent,
                timeout: None,
                interval: None,
                fail_on: vec![],
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Absent);

        assert!(delete_object(&mut session, ResourceKind::Router, None, "edge", false)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_single_object_commands_use_context_namespace() {
        let store = Arc::new(MemoryPlatform::new("kube"));
        store.insert(
            ResourceKind::Secret,
            Some("auth"),
            json!({"metadata": {"name": "tls", "namespace": "auth"}, "data": {"tls.crt": "x"}}),
        );

        let mut session = Session::new(config(), Some("kube".to_string()));
        session.attach("kube", store.clone());

        let found = resolve_object(&mut session, ResourceKind::Secret, None, "tls")
            .await
            .unwrap();
        assert!(found.is_some());

        let outcome = wait_object(
            &mut session,
            WaitRequest {
                kind: ResourceKind::Secret,
                namespace: None,
                name: "tls".into(),
                predicate: Predicate::present("/data"),
                timeout: None,
                interval: None,
                fail_on: vec![],
            },
        )
        .await
        .unwrap();
        assert!(matches!(outcome, WaitOutcome::Ready(_)));

        assert!(delete_object(&mut session, ResourceKind::Secret, None, "tls", false)
            .await
            .unwrap());
        assert!(store.objects(ResourceKind::Secret, Some("auth")).is_empty());
    }

    #[tokio::test]
    async fn test_wait_rejects_zero_interval() {
        let store = Arc::new(MemoryPlatform::new("lab"));
        store.insert(ResourceKind::Server, None, json!({"name": "vm", "status": "BUILD"}));

        let mut session = Session::new(config(), None);
        session.attach("lab", store.clone());

        let err = wait_object(
            &mut session,
            WaitRequest {
                kind: ResourceKind::Server,
                namespace: None,
                name: "vm".into(),
                predicate: Predicate::status("ACTIVE"),
                timeout: Some(Duration::from_millis(300)),
                interval: Some(Duration::ZERO),
                fail_on: vec![],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Argument(_)));
        assert_eq!(store.calls(Operation::Get, ResourceKind::Server), 0);
    }

    #[tokio::test]
    async fn test_execute_context_commands_persist() {
        use clap::Parser;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let path_arg = path.to_str().unwrap();

        let add = Cli::parse_from([
            "stratum", "--config", path_arg, "context", "add", "lab", "--url",
            "http://cloud.lab", "--platform", "openstack",
        ]);
        let output = execute(add).await.unwrap();
        assert!(output.contains("'lab' added"));

        let current = Cli::parse_from(["stratum", "--config", path_arg, "context", "current"]);
        let output = execute(current).await.unwrap();
        assert!(output.contains("lab (http://cloud.lab)"));

        let delete = Cli::parse_from(["stratum", "--config", path_arg, "context", "delete", "x"]);
        assert!(matches!(
            execute(delete).await,
            Err(CommandError::Context(ContextError::ContextNotFound(_)))
        ));
    }
}
