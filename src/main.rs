fn main() {
    if let Err(error) = crypto_converter_lib::run() {
        eprintln!("crypto-converter: {error}");
        std::process::exit(1);
    }
}
