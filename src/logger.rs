use crate::{args::Args, MainError};
use log::{warn, Level, LevelFilter};
use simplelog::{
    format_description, Color, ColorChoice, ConfigBuilder, LevelPadding, TermLogger, TerminalMode,
};

const TIMESTAMP_FORMAT_OFFSET: &[simplelog::FormatItem<'_>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3][offset_hour sign:mandatory]:[offset_minute]"
);

fn level_filter(args: &Args) -> LevelFilter {
    match (args.quiet, args.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// Sets up the global logger, it can only be called once.
pub fn init_logger(args: &Args) -> Result<(), MainError> {
    let mut builder = ConfigBuilder::new();
    builder
        .set_level_color(Level::Debug, Some(Color::Magenta))
        .set_level_color(Level::Trace, None)
        .set_level_padding(LevelPadding::Right)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .set_time_format_custom(TIMESTAMP_FORMAT_OFFSET);
    // The local offset cannot always be determined (e.g. in containers), stay in UTC then.
    let local_time = builder.set_time_offset_to_local().is_ok();

    TermLogger::init(
        level_filter(args),
        builder.build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    if !local_time {
        warn!("Cannot determine the local timezone, logging in UTC.");
    }
    if args.verbose > 3 {
        warn!("Okay, it's time to stop. It won't get more verbose than this.")
    }

    Ok(())
}
