use gumdrop::Options;

/// Watch git repositories and deploy every new commit with a command.
#[derive(Debug, Options)]
pub struct Args {
    /// The configuration file, it is reloaded on every change.
    #[options(default = "machinehead.json")]
    pub config: String,

    /// Increase verbosity, can be set multiple times (-v debug, -vv tracing)
    #[options(count)]
    pub verbose: u8,

    /// Only print the errors.
    #[options()]
    pub quiet: bool,

    /// Print the current version.
    #[options(short = "V")]
    pub version: bool,

    /// Print this help.
    #[options()]
    pub help: bool,
}

pub fn parse_args() -> Args {
    Args::parse_args_default_or_exit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_default_to_the_config_file() {
        let args = Args::parse_args_default::<&str>(&[]).unwrap();
        assert_eq!("machinehead.json", args.config);

        let args = Args::parse_args_default(&["-c", "/etc/machinehead.json"]).unwrap();
        assert_eq!("/etc/machinehead.json", args.config);

        let args = Args::parse_args_default(&["--config", "deploy.json"]).unwrap();
        assert_eq!("deploy.json", args.config);
    }
}
