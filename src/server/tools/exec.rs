use crate::error::Result;
use crate::exec::ExecutionContext;
use crate::server::params::Params;
use crate::server::registry::{ParamKind, ParamDef, Tool};
use crate::server::Services;
use crate::vm::ssh::OutputCallback;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const VM_NAME: ParamDef = ParamDef::required("vm_name", ParamKind::String, "Name of the VM");
const COMMAND: ParamDef = ParamDef::required("command", ParamKind::String, "Shell command to run in the VM");
const WORKING_DIR: ParamDef = ParamDef::optional(
    "working_dir",
    ParamKind::String,
    "Guest directory; relative paths are resolved under the guest mount",
);
const ENV: ParamDef = ParamDef::optional("env", ParamKind::Object, "Environment variables to export");

const EXEC_PARAMS: &[ParamDef] = &[
    VM_NAME,
    COMMAND,
    WORKING_DIR,
    ENV,
    ParamDef::optional("sync_before", ParamKind::Boolean, "Sync host changes to the VM first (default true)"),
    ParamDef::optional("sync_after", ParamKind::Boolean, "Sync VM changes back afterwards (default true)"),
];

const EXEC_WITH_SYNC_PARAMS: &[ParamDef] = &[VM_NAME, COMMAND, WORKING_DIR, ENV];

const BACKGROUND_PARAMS: &[ParamDef] = &[
    VM_NAME,
    COMMAND,
    WORKING_DIR,
    ENV,
    ParamDef::optional("sync_before", ParamKind::Boolean, "Sync host changes to the VM first (default true)"),
];

pub fn tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "exec_in_vm",
            description: "Execute a command in a VM",
            params: EXEC_PARAMS,
            handler: |s, p, c| Box::pin(exec_in_vm(s, p, c)),
        },
        Tool {
            name: "exec_with_sync",
            description: "Execute a command in a VM, syncing files before and after",
            params: EXEC_WITH_SYNC_PARAMS,
            handler: |s, p, c| Box::pin(exec_with_sync(s, p, c)),
        },
        Tool {
            name: "run_background_task",
            description: "Start a long-running command in a VM without waiting for it",
            params: BACKGROUND_PARAMS,
            handler: |s, p, c| Box::pin(run_background_task(s, p, c)),
        },
    ]
}

fn context(params: &Params) -> Result<ExecutionContext> {
    let mut ctx = ExecutionContext::new(params.required_str("vm_name")?);
    ctx.working_dir = params.optional_str("working_dir")?.unwrap_or_default();
    ctx.environment = params.string_map("env")?;
    ctx.sync_before = params.bool_or("sync_before", true)?;
    ctx.sync_after = params.bool_or("sync_after", true)?;
    Ok(ctx)
}

async fn run(services: &Services, params: &Params, ctx: ExecutionContext, cancel: &CancellationToken) -> Result<Value> {
    let command = params.required_str("command")?;
    let vm = ctx.vm_name.clone();
    let log_line = move |line: String, is_stderr: bool| {
        debug!(vm = %vm, stderr = is_stderr, "{}", line.trim_end());
    };
    let result = services
        .executor
        .execute_command(&command, &ctx, cancel, Some(&log_line as &OutputCallback))
        .await?;
    Ok(serde_json::to_value(result)?)
}

async fn exec_in_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let ctx = context(&params)?;
    run(&services, &params, ctx, &cancel).await
}

async fn exec_with_sync(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let mut ctx = context(&params)?;
    ctx.sync_before = true;
    ctx.sync_after = true;
    run(&services, &params, ctx, &cancel).await
}

async fn run_background_task(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let command = params.required_str("command")?;
    let mut ctx = context(&params)?;
    ctx.sync_after = false;
    let task = services
        .executor
        .execute_background(&command, &ctx, &cancel)
        .await?;
    Ok(serde_json::to_value(task)?)
}
