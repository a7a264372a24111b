fn main() {
    uniffi::generate_scaffolding("src/emsurvey.udl").unwrap();
}
