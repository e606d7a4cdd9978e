//! Implements the firmware's tasks, other than the USB stack.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_futures::yield_now;
use embassy_time::{Instant, Timer};

use crate::constants::{BOOTLOADER_REBOOT_DELAY, DISPATCH_LOOP_TIMER, LOOP_LOG_INTERVAL};
use crate::dispatch::DeviceAction;
use crate::infra::watchdog::{reboot_bootloader, reboot_normal};
use crate::usb::control::DISPATCHER;
use crate::util::time::Clock;

// Threading and tasks model
//
// Core 0 runs the embassy USB stack in its thread mode executor.  The stack
// calls our control handler, which decodes requests and queues up bus work
// in the dispatcher.
//
// Core 1 runs the dispatcher task, below, which performs that bus work.  Bus
// work blocks, sometimes for seconds, so the task takes the work (and the
// engine) out of the dispatcher and runs it without holding the lock.  The
// control handler can then keep answering GET_RESULT polls with the
// request's progress.
//
// DISPATCHER is shared between the cores, so is protected by a critical
// section mutex.  Neither side holds it for longer than a quick command.

/// Runs queued bus operations, and any device action a command asked for.
#[embassy_executor::task]
pub async fn dispatcher_task() -> ! {
    info!("Dispatcher task started");

    let mut next_log_instant = Instant::now();
    loop {
        let now = Instant::now();
        if now >= next_log_instant {
            trace!("Dispatcher loop");
            next_log_instant += LOOP_LOG_INTERVAL;
        }

        let (job, action) = DISPATCHER.lock(|d| match d.borrow_mut().as_mut() {
            Some(dispatcher) => {
                if let Some(iec) = dispatcher.iec_mut() {
                    iec.bus_mut().feed_watchdog();
                }
                (dispatcher.start_job(), dispatcher.take_action())
            }
            None => (None, None),
        });

        if let Some(DeviceAction::EnterBootloader) = action {
            Timer::after(BOOTLOADER_REBOOT_DELAY).await;
            reboot_bootloader();
        }

        match job {
            Some(mut job) => {
                job.run();
                DISPATCHER.lock(|d| {
                    if let Some(dispatcher) = d.borrow_mut().as_mut() {
                        dispatcher.finish_job(job);
                    }
                });
                // There may be a follow-up request already waiting
                yield_now().await;
            }
            None => Timer::after(DISPATCH_LOOP_TIMER).await,
        }
    }
}

/// Method to spawn tasks.
///
/// Using the Spawner object to spawn can fail, because too many instances of
/// that task are already running.  By default only 1 is allowed at once.  We
/// handle that by rebooting - but it shouldn't happen as tasks are only
/// spawned at start of day.
///
/// Example:
/// ```ignore
/// spawn_or_reboot(spawner.spawn(my_task()), "my_task");
/// ```
pub fn spawn_or_reboot<T, E: defmt::Format>(spawn_result: Result<T, E>, task_name: &str) {
    match spawn_result {
        Ok(_) => debug!("Spawned task {}", task_name),
        Err(e) => {
            error!("Failed to spawn task: {}, error: {}", task_name, e);
            reboot_normal();
        }
    }
}
