use game_engine_ffi::classes::{EngineClass, FileAccess, ModeFlags, Node};
use game_engine_ffi::config::FfiConfig;
use game_engine_ffi::core::{BindingError, BindingResult, BindingRuntime};
use game_engine_ffi::CallContext;

const PROBE_FILE: &str = "user://ffi_probe.bin";

fn self_check(cx: &CallContext<'_>) -> BindingResult<()> {
    let file = FileAccess::open(cx, PROBE_FILE, ModeFlags::Write)?;
    file.store_16(cx, 65_494)?;
    file.store_string(cx, "probe")?;
    file.close(cx)?;

    let file = FileAccess::open(cx, PROBE_FILE, ModeFlags::Read)?;
    let (value, length) = (file.get_16(cx)?, file.get_length(cx)?);
    if value != 65_494 || length != 7 {
        return Err(BindingError::ReturnSlot(format!(
            "file round trip returned {value} with length {length}"
        )));
    }
    file.close(cx)?;

    let parent = Node::new(cx)?;
    let child = Node::new(cx)?;
    child.set_name(cx, "ProbeChild")?;
    parent.add_child(cx, &child)?;
    let found = parent.get_child(cx, 0)?;
    if found != Some(child) || child.get_parent(cx)? != Some(parent) {
        return Err(BindingError::StaleInstance(child.get_instance_id(cx)?));
    }
    tracing::info!(child = %child.get_name(cx)?, "self-check passed");
    Ok(())
}

fn main() {
    let mut config = match std::env::args().nth(1) {
        Some(path) => match FfiConfig::from_toml_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => FfiConfig::load_or_default(),
    };
    config.apply_env_overrides();
    BindingRuntime::init_logging(&config.logging);

    let runtime = match BindingRuntime::builder(config).build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Binding runtime failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.scope(self_check).and_then(|result| result) {
        eprintln!("Self-check failed: {}", e);
        std::process::exit(1);
    }

    match serde_json::to_string_pretty(&runtime.stats()) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize stats: {}", e),
    }
}
