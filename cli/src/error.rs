use std::process::ExitCode;

pub type CliResult<T> = anyhow::Result<T>;

/// Print the error chain to stderr and map the outcome to an exit code
///
/// Configuration problems exit with 2, everything else with 1.
pub fn to_exit_code(result: CliResult<()>) -> ExitCode {
    let Err(e) = result else {
        return ExitCode::SUCCESS;
    };

    eprintln!("error: {e}");
    for cause in e.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }

    let config_error = e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<courier::Error>(),
            Some(courier::Error::Config(_) | courier::Error::UnsupportedPlatform(_))
        )
    });
    if config_error {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}
