fn main() {
    apogee::run();
}
