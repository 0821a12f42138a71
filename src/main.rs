fn main() -> anyhow::Result<()> {
    playlist_dl::main()
}
