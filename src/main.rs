fn main() -> anyhow::Result<()> {
    brrtsupervisor::cli::run_cli()
}
