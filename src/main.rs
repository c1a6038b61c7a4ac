use throng::error::AppResult;

fn main() -> AppResult<()> {
    throng::run()
}
