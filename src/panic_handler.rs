use std::panic;

use log::error;

/// Install the panic hooks of the command line tool
///
/// Debug builds print a detailed backtrace; release builds write a crash
/// report and point the user at it. Either way the panic also lands in the
/// log file, which is often the only trace left of a font that crashed the
/// rasterizer.
pub fn initialize_panic_handler() {
    if cfg!(debug_assertions) {
        better_panic::install();
    } else {
        human_panic::setup_panic!();
    }

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        error!("panic: {panic_info}");
        log::logger().flush();
        default_hook(panic_info);
    }));
}
