fn main() {
    println!("barfit-rs - Pooled Mutant Fitness Tool");
    println!();
    println!("Use the barfit binary to run the fitness computation:");
    println!("  barfit        - Gene annotation + counts + metadata -> fitness tables");
    println!();
    println!("For help:");
    println!("  cargo run --bin barfit -- --help");
    println!();
    println!("Quick start example:");
    println!("  cargo run --bin barfit -- \\");
    println!("    --genes genes.tsv --counts counts.tsv --metadata exps.tsv \\");
    println!("    --strain-output strain_fitness.tsv.gz --gene-output gene_fitness.tsv.gz");
}
