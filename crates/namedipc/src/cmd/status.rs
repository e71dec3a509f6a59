use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use namedipc_resource::{
    NamedSemaphore, ResourceHandle, ResourceKind, ResourceName, SemaphoreAttrs,
};
use serde::Serialize;

use crate::cmd::shm::{is_not_found, peek};
use crate::cmd::{lock_name, StatusArgs};
use crate::config::{AppContext, Config};
use crate::exit::{io_error, resource_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ResourceStatus {
    program: &'static str,
    role: &'static str,
    name: String,
    kind: &'static str,
    exists: bool,
    /// Semaphore value, pending messages, or attached processes.
    value: Option<i64>,
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    resources: Vec<ResourceStatus>,
}

pub fn run(_args: StatusArgs, ctx: &AppContext) -> CliResult<i32> {
    let output = StatusOutput {
        resources: collect(&ctx.config)?,
    };
    print_status(&output, ctx.format);
    Ok(SUCCESS)
}

fn collect(config: &Config) -> CliResult<Vec<ResourceStatus>> {
    let mut rows = Vec::new();

    #[cfg(target_os = "linux")]
    {
        rows.push(queue_status(&config.queue_name)?);
        let refs = crate::cmd::queue::refs_name(&config.queue_name)?;
        rows.push(semaphore_status("queue", "process counter", &refs)?);
        rows.push(semaphore_status("queue", "attach lock", &lock_name(&refs)?)?);
    }

    rows.push(semaphore_status(
        "semaphore",
        "critical section",
        &config.mutex_name,
    )?);
    rows.push(semaphore_status(
        "semaphore",
        "process counter",
        &config.counter_name,
    )?);
    rows.push(semaphore_status(
        "semaphore",
        "attach lock",
        &lock_name(&config.counter_name)?,
    )?);

    rows.push(segment_status(&config.shm_name)?);
    rows.push(semaphore_status("shm", "attach lock", &lock_name(&config.shm_name)?)?);

    Ok(rows)
}

fn absent(
    program: &'static str,
    role: &'static str,
    name: &ResourceName,
    kind: ResourceKind,
) -> ResourceStatus {
    ResourceStatus {
        program,
        role,
        name: name.to_string(),
        kind: kind.as_str(),
        exists: false,
        value: None,
        detail: None,
    }
}

fn semaphore_status(
    program: &'static str,
    role: &'static str,
    name: &ResourceName,
) -> CliResult<ResourceStatus> {
    let attrs = SemaphoreAttrs::default();
    let sem = match ResourceHandle::<NamedSemaphore>::open_existing(name, &attrs) {
        Ok(sem) => sem,
        Err(err) if is_not_found(&err) => {
            return Ok(absent(program, role, name, ResourceKind::Semaphore))
        }
        Err(err) => return Err(resource_error("unable to open semaphore", err)),
    };
    let value = sem.value().map_err(|err| io_error("sem_getvalue", err))?;
    Ok(ResourceStatus {
        exists: true,
        value: Some(i64::from(value)),
        ..absent(program, role, name, ResourceKind::Semaphore)
    })
}

#[cfg(target_os = "linux")]
fn queue_status(name: &ResourceName) -> CliResult<ResourceStatus> {
    use namedipc_resource::{MessageQueue, QueueAttrs};

    let queue = match ResourceHandle::<MessageQueue>::open_existing(name, &QueueAttrs::default()) {
        Ok(queue) => queue,
        Err(err) if is_not_found(&err) => {
            return Ok(absent("queue", "messages", name, ResourceKind::MessageQueue))
        }
        Err(err) => return Err(resource_error("unable to open message queue", err)),
    };
    let status = queue.status().map_err(|err| io_error("mq_getattr", err))?;
    Ok(ResourceStatus {
        exists: true,
        value: Some(status.pending as i64),
        detail: Some(format!(
            "depth={} message_size={}",
            status.max_messages, status.message_size
        )),
        ..absent("queue", "messages", name, ResourceKind::MessageQueue)
    })
}

fn segment_status(name: &ResourceName) -> CliResult<ResourceStatus> {
    let row = absent("shm", "counters", name, ResourceKind::SharedMemory);
    Ok(match peek(name)? {
        Some((attached, counter)) => ResourceStatus {
            exists: true,
            value: Some(i64::from(attached)),
            detail: Some(format!("counter={counter}")),
            ..row
        },
        None => row,
    })
}

fn print_status(output: &StatusOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PROGRAM", "ROLE", "NAME", "KIND", "EXISTS", "VALUE", "DETAIL"]);
            for row in &output.resources {
                table.add_row(vec![
                    row.program.to_string(),
                    row.role.to_string(),
                    row.name.clone(),
                    row.kind.to_string(),
                    if row.exists { "yes" } else { "no" }.to_string(),
                    row.value.map(|v| v.to_string()).unwrap_or_default(),
                    row.detail.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("namedipc status\n");
            for row in &output.resources {
                let state = match row.value {
                    Some(value) if row.exists => format!("present, value {value}"),
                    _ if row.exists => "present".to_string(),
                    _ => "absent".to_string(),
                };
                let detail = row
                    .detail
                    .as_deref()
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default();
                println!(
                    "  {:<10} {:<17} {:<24} {state}{detail}",
                    row.program, row.role, row.name
                );
            }
        }
    }
}
