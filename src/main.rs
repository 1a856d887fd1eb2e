mod avatar;
mod bot;
mod client;
mod config;
mod dialogs;
mod member_info;
mod member_list;
mod power_levels;
#[cfg(test)]
mod testing;

use std::sync::atomic::Ordering;

use once_cell::sync::Lazy;

const ALLOWED_FAILURES: u32 = 10;

fn main() {
    tracing_subscriber::fmt::init();
    Lazy::force(&config::CONFIG);
    run_daemon("bot", bot::run, || bot::STARTED.load(Ordering::SeqCst));
}

fn run_daemon(name: &'static str, f: impl Fn() -> anyhow::Result<()>, started: impl Fn() -> bool) {
    let mut fails = 0;
    loop {
        if let Err(e) = f() {
            if started() {
                if fails <= ALLOWED_FAILURES {
                    tracing::error!("{name} failed <restarting>: {e:#}");
                    fails += 1;
                } else {
                    tracing::error!(
                        "{name} failed more than {ALLOWED_FAILURES} times <exiting>: {e:#}"
                    );
                    std::process::exit(1);
                }
            } else {
                tracing::error!("{name} failed to start <exiting>: {e:#}");
                std::process::exit(1);
            }
        }
    }
}
