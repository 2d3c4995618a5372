use crate::cli::HashArgs;
use crate::error::CliResult;

pub fn execute(args: HashArgs) -> CliResult<()> {
    let hash = courier::compute_type_hash(&args.name, args.command_version.as_deref());
    println!("{hash}");
    Ok(())
}
