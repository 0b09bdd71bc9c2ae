use crate::cli::InitOptions;
use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use geocube_common::cache::CacheConfig;
use geocube_common::settings::Settings;
use geocube_common::tree::TreeConfig;

fn print_header(header: &str) {
    println!();
    println!("################################################################################");
    println!("# {header}");
    println!("################################################################################");
}

fn tree_config_interactive(theme: &ColorfulTheme) -> TreeConfig {
    let nr_dims: usize = Input::with_theme(theme)
        .with_prompt("Number of indexed dimensions")
        .default(2)
        .interact()
        .unwrap();

    let mut dims = Vec::with_capacity(nr_dims);
    let mut d_caps = Vec::with_capacity(nr_dims);
    let mut init_mins = Vec::with_capacity(nr_dims);
    let mut init_maxs = Vec::with_capacity(nr_dims);
    for i in 0..nr_dims {
        println!("Dimension {i}:");
        dims.push(
            Input::with_theme(theme)
                .with_prompt("  field index")
                .default(i as u32)
                .interact()
                .unwrap(),
        );
        d_caps.push(
            Input::with_theme(theme)
                .with_prompt("  cells per split along this dimension")
                .default(4u32)
                .interact()
                .unwrap(),
        );
        init_mins.push(
            Input::with_theme(theme)
                .with_prompt("  initial lower bound")
                .default(0.0)
                .interact()
                .unwrap(),
        );
        init_maxs.push(
            Input::with_theme(theme)
                .with_prompt("  initial upper bound")
                .interact()
                .unwrap(),
        );
    }

    let split_ratio: f64 = Input::with_theme(theme)
        .with_prompt("Split threshold, as a fraction of a leaf's capacity")
        .default(0.9)
        .interact()
        .unwrap();

    TreeConfig {
        dims,
        d_caps,
        split_ratio,
        init_mins,
        init_maxs,
    }
}

fn cache_config_interactive(theme: &ColorfulTheme, path: &std::path::Path) -> CacheConfig {
    let cache_size: usize = Input::with_theme(theme)
        .with_prompt("Cache size (resident metacubes)")
        .default(64)
        .interact()
        .unwrap();
    let sample_ratio: f64 = Input::with_theme(theme)
        .with_prompt("Eviction sample ratio")
        .default(0.1)
        .interact()
        .unwrap();
    let read_all_weight: f64 = Input::with_theme(theme)
        .with_prompt("Weight given to a read-all access vs a single-cell read")
        .default(0.5)
        .interact()
        .unwrap();

    CacheConfig {
        cache_size,
        sample_ratio,
        read_all_weight,
        root: path.to_path_buf(),
    }
}

pub fn run(init_options: InitOptions) -> Result<()> {
    let theme = ColorfulTheme::default();

    print_header("Tree");
    let tree = tree_config_interactive(&theme);

    print_header("Cache");
    let cache = cache_config_interactive(&theme, &init_options.path);

    let settings = Settings { tree, cache };

    std::fs::create_dir_all(&init_options.path)?;
    let settings_path = init_options.path.join("settings.json");
    if settings_path.exists()
        && !Confirm::with_theme(&theme)
            .with_prompt(format!("{} already exists. Overwrite?", settings_path.display()))
            .default(false)
            .interact()?
    {
        return Ok(());
    }

    settings.save_to_data_folder(&init_options.path)?;
    println!("Wrote {}", settings_path.display());
    Ok(())
}
