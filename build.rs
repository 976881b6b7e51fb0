fn main() {
    use vergen::{BuildBuilder, CargoBuilder, Emitter};

    let mut emitter = Emitter::default();

    // Only the build date and target triple end up in the banner.
    if let Ok(build) = BuildBuilder::default().build_date(true).build() {
        let _ = emitter.add_instructions(&build);
    }
    if let Ok(cargo) = CargoBuilder::default().target_triple(true).build() {
        let _ = emitter.add_instructions(&cargo);
    }

    if let Err(e) = emitter.emit() {
        eprintln!("vergen emit skipped: {e}");
    }
}
