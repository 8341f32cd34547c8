fn main() -> anyhow::Result<()> {
    user_registry::cli::run()
}
