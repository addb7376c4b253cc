use wgups::solver::simulate;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simulate::run()
}
