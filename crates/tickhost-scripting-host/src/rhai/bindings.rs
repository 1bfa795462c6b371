//! Host functions visible to Rhai scripts, bound to one script's API

use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, Map, INT};

use tickhost_scripting_api::{EventKind, EventPriority, GuestFn, GuestValue};

use super::{from_dynamic, to_dynamic};
use crate::api::ScriptApi;
use crate::error::TaskError;
use crate::lifecycle::{CommandSpec, ConnectionId, ConnectionKind, ConnectionSpec};
use crate::task::{CancelOutcome, TaskId};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

pub(super) fn register(engine: &mut Engine, api: ScriptApi) {
    register_logging(engine, &api);
    register_tasks(engine, &api);
    register_listeners(engine, &api);
    register_commands(engine, &api);
    register_connections(engine, &api);
}

fn guest_fn(function: &FnPtr) -> GuestFn {
    GuestFn::new(function.fn_name().to_string(), function.clone())
}

fn guest_args(args: Array) -> Vec<GuestValue> {
    args.iter().map(from_dynamic).collect()
}

fn task_id(result: Result<TaskId, TaskError>) -> RhaiResult<INT> {
    result
        .map(|id| id.get() as INT)
        .map_err(|e| e.to_string().into())
}

/// Log a usage error to the script and raise it in the guest
fn usage_error(api: &ScriptApi, message: String) -> Box<EvalAltResult> {
    api.logger().error(&message);
    message.into()
}

fn register_logging(engine: &mut Engine, api: &ScriptApi) {
    let a = api.clone();
    engine.on_print(move |text| a.logger().info(text));
    let a = api.clone();
    engine.on_debug(move |text, _source, position| {
        a.logger().debug(&format!("{} ({})", text, position));
    });

    let a = api.clone();
    engine.register_fn("log_info", move |message: ImmutableString| a.logger().info(&message));
    let a = api.clone();
    engine.register_fn("log_warn", move |message: ImmutableString| a.logger().warn(&message));
    let a = api.clone();
    engine.register_fn("log_error", move |message: ImmutableString| a.logger().error(&message));
    let a = api.clone();
    engine.register_fn("log_debug", move |message: ImmutableString| a.logger().debug(&message));

    let a = api.clone();
    engine.register_fn("script_name", move || a.script_name().to_string());
    let a = api.clone();
    engine.register_fn("script_config", move || to_dynamic(a.script_config()));
}

fn register_tasks(engine: &mut Engine, api: &ScriptApi) {
    let a = api.clone();
    engine.register_fn("run_task", move |f: FnPtr| task_id(a.run_task(guest_fn(&f), Vec::new())));
    let a = api.clone();
    engine.register_fn("run_task", move |f: FnPtr, args: Array| {
        task_id(a.run_task(guest_fn(&f), guest_args(args)))
    });

    let a = api.clone();
    engine.register_fn("run_task_later", move |f: FnPtr, delay: INT| {
        task_id(a.run_task_later(guest_fn(&f), delay, Vec::new()))
    });
    let a = api.clone();
    engine.register_fn("run_task_later", move |f: FnPtr, delay: INT, args: Array| {
        task_id(a.run_task_later(guest_fn(&f), delay, guest_args(args)))
    });

    let a = api.clone();
    engine.register_fn("run_task_timer", move |f: FnPtr, delay: INT, interval: INT| {
        task_id(a.run_task_timer(guest_fn(&f), delay, interval, Vec::new()))
    });
    let a = api.clone();
    engine.register_fn(
        "run_task_timer",
        move |f: FnPtr, delay: INT, interval: INT, args: Array| {
            task_id(a.run_task_timer(guest_fn(&f), delay, interval, guest_args(args)))
        },
    );

    let a = api.clone();
    engine.register_fn("run_task_async", move |f: FnPtr| {
        task_id(a.run_task_async(guest_fn(&f), Vec::new()))
    });
    let a = api.clone();
    engine.register_fn("run_task_async", move |f: FnPtr, args: Array| {
        task_id(a.run_task_async(guest_fn(&f), guest_args(args)))
    });

    let a = api.clone();
    engine.register_fn("run_sync_callback_task", move |f: FnPtr, callback: FnPtr| {
        task_id(a.run_sync_callback_task(guest_fn(&f), guest_fn(&callback), Vec::new()))
    });
    let a = api.clone();
    engine.register_fn(
        "run_sync_callback_task",
        move |f: FnPtr, callback: FnPtr, args: Array| {
            task_id(a.run_sync_callback_task(guest_fn(&f), guest_fn(&callback), guest_args(args)))
        },
    );

    let a = api.clone();
    engine.register_fn("current_task", move || match a.current_task() {
        Some(id) => Dynamic::from(id.get() as INT),
        None => Dynamic::UNIT,
    });
    let a = api.clone();
    engine.register_fn("is_cancelled", move || {
        a.current_task().is_some_and(|id| a.is_task_cancelled(id))
    });
    let a = api.clone();
    engine.register_fn("is_cancelled", move |id: INT| match u64::try_from(id) {
        Ok(id) => a.is_task_cancelled(TaskId::from_raw(id)),
        Err(_) => true,
    });

    let a = api.clone();
    engine.register_fn("stop_task", move |id: INT| match u64::try_from(id) {
        Ok(id) => a.cancel_task(TaskId::from_raw(id)) == CancelOutcome::Cancelled,
        Err(_) => false,
    });
}

fn listen(
    api: &ScriptApi,
    function: &FnPtr,
    event: &str,
    priority: &str,
    ignore_cancelled: bool,
) -> RhaiResult<()> {
    let kind: EventKind = event
        .parse()
        .map_err(|e: tickhost_scripting_api::UnknownEventKind| usage_error(api, e.to_string()))?;
    let priority: EventPriority = priority
        .parse()
        .map_err(|e: tickhost_scripting_api::UnknownPriority| usage_error(api, e.to_string()))?;
    api.register_listener(guest_fn(function), kind, priority, ignore_cancelled)
        .map(|_| ())
        .map_err(|e| e.to_string().into())
}

fn register_listeners(engine: &mut Engine, api: &ScriptApi) {
    let a = api.clone();
    engine.register_fn("register_listener", move |f: FnPtr, event: ImmutableString| {
        listen(&a, &f, &event, EventPriority::Normal.as_str(), false)
    });
    let a = api.clone();
    engine.register_fn(
        "register_listener",
        move |f: FnPtr, event: ImmutableString, priority: ImmutableString| {
            listen(&a, &f, &event, &priority, false)
        },
    );
    let a = api.clone();
    engine.register_fn(
        "register_listener",
        move |f: FnPtr, event: ImmutableString, priority: ImmutableString, ignore_cancelled: bool| {
            listen(&a, &f, &event, &priority, ignore_cancelled)
        },
    );

    let a = api.clone();
    engine.register_fn("unregister_listener", move |f: FnPtr| -> RhaiResult<()> {
        a.unregister_listener(&guest_fn(&f))
            .map_err(|e| e.to_string().into())
    });
}

fn string_option(options: &Map, key: &str) -> Option<String> {
    options
        .get(key)
        .filter(|value| value.is_string())
        .map(Dynamic::to_string)
}

fn command_spec(name: &str, function: &FnPtr, options: &Map) -> CommandSpec {
    let mut spec = CommandSpec::new(name, guest_fn(function));
    if let Some(description) = string_option(options, "description") {
        spec = spec.description(description);
    }
    if let Some(usage) = string_option(options, "usage") {
        spec = spec.usage(usage);
    }
    if let Some(aliases) = options.get("aliases").and_then(|v| v.clone().try_cast::<Array>()) {
        spec = spec.aliases(aliases.iter().filter(|a| a.is_string()).map(Dynamic::to_string));
    }
    if let Some(permission) = string_option(options, "permission") {
        spec = spec.permission(permission);
    }
    if let Some(message) = string_option(options, "permission_message") {
        spec = spec.permission_message(message);
    }
    if let Some(tab) = options.get("tab_complete").and_then(|v| v.clone().try_cast::<FnPtr>()) {
        spec = spec.tab_completer(guest_fn(&tab));
    }
    spec
}

fn register_commands(engine: &mut Engine, api: &ScriptApi) {
    let a = api.clone();
    engine.register_fn("register_command", move |name: ImmutableString, f: FnPtr| -> RhaiResult<()> {
        a.register_command(command_spec(&name, &f, &Map::new()))
            .map_err(|e| e.to_string().into())
    });
    let a = api.clone();
    engine.register_fn(
        "register_command",
        move |name: ImmutableString, f: FnPtr, options: Map| -> RhaiResult<()> {
            a.register_command(command_spec(&name, &f, &options))
                .map_err(|e| e.to_string().into())
        },
    );

    let a = api.clone();
    engine.register_fn("unregister_command", move |name: ImmutableString| -> RhaiResult<()> {
        a.unregister_command(&name).map_err(|e| e.to_string().into())
    });
}

fn connect(
    api: &ScriptApi,
    kind: ConnectionKind,
    host: &str,
    port: INT,
    database: &str,
    username: &str,
    password: &str,
) -> RhaiResult<INT> {
    let port = u16::try_from(port).map_err(|_| usage_error(api, format!("invalid port {}", port)))?;
    let spec = ConnectionSpec::new(kind, host, port, database).with_credentials(username, password);
    api.connect(&spec)
        .map(|id| id.get() as INT)
        .map_err(|e| e.to_string().into())
}

fn register_connections(engine: &mut Engine, api: &ScriptApi) {
    let a = api.clone();
    engine.register_fn(
        "connect_sql",
        move |host: ImmutableString,
              port: INT,
              database: ImmutableString,
              username: ImmutableString,
              password: ImmutableString| {
            connect(&a, ConnectionKind::Tabular, &host, port, &database, &username, &password)
        },
    );
    let a = api.clone();
    engine.register_fn(
        "connect_mongo",
        move |host: ImmutableString,
              port: INT,
              database: ImmutableString,
              username: ImmutableString,
              password: ImmutableString| {
            connect(&a, ConnectionKind::Document, &host, port, &database, &username, &password)
        },
    );

    let a = api.clone();
    engine.register_fn("disconnect", move |id: INT| -> RhaiResult<bool> {
        let id = u64::try_from(id).map_err(|_| usage_error(&a, format!("invalid connection id {}", id)))?;
        a.disconnect(ConnectionId::from_raw(id))
            .map_err(|e| e.to_string().into())
    });
}
