use colored::Colorize;

use crate::CompilerError;

/// 打印错误信息并以给定的退出码终止进程
pub fn print_error_and_exit(error: &CompilerError, exit_code: i32) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), error.to_string().bold());
    std::process::exit(exit_code)
}
