use vergen::EmitBuilder;

fn main() {
    // 生成构建信息，供 --version 显示；不在 git 仓库中构建时 vergen 会给出占位值
    if let Err(e) = EmitBuilder::builder().all_build().all_git().emit() {
        println!("cargo:warning=无法生成构建信息: {}", e);
    }
}
