//! Starts core 1, which runs the bus operations.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_executor::Executor;
use embassy_rp::multicore::{Stack, spawn_core1 as rp_spawn_core1};
use embassy_rp::peripherals::CORE1;
use static_cell::StaticCell;

use crate::constants::CORE1_STACK_SIZE;
use crate::task::{dispatcher_task, spawn_or_reboot};

// A stack for core 1.  Only spawn_core1() takes a reference to it, once.
static mut CORE1_STACK: Stack<CORE1_STACK_SIZE> = Stack::new();

// An executor for core 1.
static EXECUTOR1: StaticCell<Executor> = StaticCell::new();

/// Start core 1's executor, running the dispatcher task.
#[allow(static_mut_refs)]
pub fn spawn_core1(p_core1: CORE1) {
    info!("Starting core 1");
    rp_spawn_core1(p_core1, unsafe { &mut CORE1_STACK }, move || {
        let executor1 = EXECUTOR1.init(Executor::new());
        executor1.run(|spawner| spawn_or_reboot(spawner.spawn(dispatcher_task()), "Dispatcher"))
    });
}
