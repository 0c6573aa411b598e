use std::path::PathBuf;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("unknown argument: {0}")]
    Unknown(String),
}

/// Command line options.  Everything else comes from the settings file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub help: bool,
    pub device: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub status: Option<PathBuf>,
    pub list_devices: bool,
    pub print_settings: bool,
}

impl Args {
    pub fn from_env() -> Result<Self, ArgsError> {
        Self::parse(std::env::args().skip(1))
    }

    /// Parses arguments, excluding the program name.
    pub fn parse<I, S>(args: I) -> Result<Self, ArgsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => parsed.help = true,
                "--list-devices" => parsed.list_devices = true,
                "--print-settings" => parsed.print_settings = true,
                "--device" | "--settings" | "--status" => {
                    let value = args
                        .next()
                        .map(PathBuf::from)
                        .ok_or_else(|| ArgsError::MissingValue(arg.clone()))?;
                    match arg.as_str() {
                        "--device" => parsed.device = Some(value),
                        "--settings" => parsed.settings = Some(value),
                        _ => parsed.status = Some(value),
                    }
                }
                _ => return Err(ArgsError::Unknown(arg)),
            }
        }
        Ok(parsed)
    }
}

pub fn print_help() {
    println!("flux-daemon - Clip hotkey listener for Linux");
    println!();
    println!("USAGE:");
    println!("    flux-daemon [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help              Print this help message");
    println!("        --device <PATH>     Use this input device instead of auto-detecting a keyboard");
    println!("        --settings <PATH>   Settings file (default: ~/.config/flux/settings.json)");
    println!("        --status <PATH>     Status file (default: <tmp>/flux/status.json)");
    println!("        --list-devices      List input devices with key events and exit");
    println!("        --print-settings    Print the effective settings as JSON and exit");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG      Set log level (e.g., debug, info, warn)");
    println!();
    println!("Reading /dev/input requires root or membership in the 'input' group.");
}
