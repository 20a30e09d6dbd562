fn main() {
    fauxcall_lib::run()
}
