use argh::FromArgs;
use tracing_subscriber::EnvFilter;

use cuzk_msm::{
    testing::{naive_msm, random_points, random_scalars},
    timing::always_timed,
    App, Config,
};

#[derive(FromArgs)]
/// Run a random MSM instance on the host device
pub struct Args {
    /// log2 of the instance size
    #[argh(positional)]
    pub size: u8,

    /// bits per scalar window
    #[argh(option, default = "16")]
    pub chunk_size: usize,

    /// points per cluster before overflow
    #[argh(option, default = "4")]
    pub cluster_size: usize,

    /// check every stage on the host
    #[argh(switch)]
    pub verify: bool,

    /// verbose output
    #[argh(switch, short = 'v')]
    pub verbose: bool,
}

fn main() {
    let args: Args = argh::from_env();

    let default = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();

    let config = Config {
        max_cluster_size: args.cluster_size,
        verify: args.verify,
        ..Config::with_chunk_size(args.chunk_size)
    };
    let device = gpu::Host::new().unwrap();
    let mut app = match App::new(device, config) {
        Ok(app) => app,
        Err(error) => {
            eprintln!("configuration error: {}", error);
            std::process::exit(2);
        }
    };

    let points = always_timed("generating points", || random_points(args.size));
    let scalars = always_timed("generating scalars", || random_scalars(args.size));

    let point = match always_timed(&format!("MSM/{}", args.size), || app.msm(&points, &scalars)) {
        Ok(point) => point,
        Err(error) => {
            eprintln!("\n==> FAILURE <==\n{}", error);
            std::process::exit(1);
        }
    };
    let sum = always_timed("naive MSM", || naive_msm(&points, &scalars));

    if args.verbose {
        println!("sum: {:?}", &sum);
        println!("res: {:?}", &point);
    }
    if point != sum {
        println!("\n==> FAILURE <==");
        std::process::exit(1);
    } else {
        println!("\n==> SUCCESS <==");
    }
}
