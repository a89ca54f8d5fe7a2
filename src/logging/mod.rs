/**
 * Initializes the logger
 *
 * https://docs.rs/slog/latest/slog/
 *
 */
use std::sync::Mutex;

use slog::{Drain, Level, LevelFilter, Logger};
use slog_async::Async;
use slog_term::FullFormat;

/**
 * Initializes the logger.
 *
 * This function sets up the logger with the specified level. It uses the
 * `slog` crate for structured logging with a terminal decorator and an
 * asynchronous drain.
 *
 * @param level The minimum level that will be emitted.
 * @return A `Logger` instance configured with the specified log level.
 */
pub fn init_logger(level: Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = Async::new(drain).build().fuse();

    let drain = LevelFilter::new(drain, level).fuse();
    Logger::root(Mutex::new(drain).fuse(), slog::o!())
}
