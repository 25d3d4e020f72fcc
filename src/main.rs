use rlnet::cartpole::CartPoleEnvironment;
use rlnet::config::PpoConfig;
use rlnet::env::Environment;
use rlnet::log;
use rlnet::pendulum::PendulumEnvironment;
use rlnet::ppo::Ppo;

const CONFIG_FILE: &str = "ppo_config.json";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("train");
    let env_name = args.get(2).map(String::as_str).unwrap_or("cartpole");

    let config = PpoConfig::load(CONFIG_FILE).unwrap_or_else(|| {
        log::info(&format!("no {CONFIG_FILE} found - using default hyperparameters"));
        PpoConfig::default()
    });

    let environment: Box<dyn Environment> = match env_name {
        "cartpole" => Box::new(CartPoleEnvironment::new(config.seed)),
        "pendulum" => Box::new(PendulumEnvironment::new(config.seed)),
        other => {
            eprintln!("unknown environment '{other}' - use: cartpole | pendulum");
            std::process::exit(2);
        }
    };

    let critic_file = format!("{env_name}_critic.nn");
    let actor_file = format!("{env_name}_actor.nn");

    let mut trainer = Ppo::new(environment, config.clone(), &critic_file, &actor_file);
    trainer.load_from_files();

    match command {
        "train" => {
            if let Err(err) = trainer.learn(config.total_timesteps) {
                log::error(&format!("training aborted: {err}"));
                std::process::exit(1);
            }
            // Quick look at what the trained policy does.
            trainer.show_real_time(1);
        }
        "show" => trainer.show_real_time(3),
        other => {
            eprintln!("unknown command '{other}' - use: rlnet [train|show] [cartpole|pendulum]");
            std::process::exit(2);
        }
    }
}
