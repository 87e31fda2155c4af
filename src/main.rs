fn main() -> anyhow::Result<()> {
    exo_chat_lib::run()
}
