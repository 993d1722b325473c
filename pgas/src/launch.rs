//! Thread-per-unit launcher over an in-process fabric.

use fabric::{FabricConfig, World};

use crate::config::Config;
use crate::error::Result;
use crate::runtime::Runtime;

/// Run `f` on `nunits` units, one thread each, and collect every unit's
/// result in unit order.
///
/// Each thread initialises its [`Runtime`], runs `f` and finalizes the
/// runtime even when `f` fails. A panicking unit is propagated to the
/// caller once every thread has finished.
pub fn launch<T, F>(nunits: usize, fabric: FabricConfig, config: Config, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&Runtime) -> Result<T> + Sync,
{
    let endpoints = World::create(fabric, nunits)?;
    let cores = if config.pin_threads {
        core_affinity::get_core_ids().unwrap_or_default()
    } else {
        Vec::new()
    };
    let f = &f;

    std::thread::scope(|s| {
        let threads: Vec<_> = endpoints
            .into_iter()
            .enumerate()
            .map(|(unit, endpoint)| {
                let config = config.clone();
                let core = (!cores.is_empty()).then(|| cores[unit % cores.len()]);
                s.spawn(move || -> Result<T> {
                    let _span = tracing::info_span!("unit", id = unit).entered();
                    if let Some(core) = core
                        && !core_affinity::set_for_current(core)
                    {
                        tracing::warn!(core = core.id, "failed to pin unit thread");
                    }
                    let runtime = Runtime::init(endpoint, config)?;
                    let out = f(&runtime);
                    let finalized = runtime.finalize();
                    let out = out?;
                    finalized?;
                    Ok(out)
                })
            })
            .collect();
        threads
            .into_iter()
            .map(|t| t.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
            .collect()
    })
}
