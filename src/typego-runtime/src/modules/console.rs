use rquickjs::prelude::Rest;
use rquickjs::Coerced;

use super::io::io::print;

fn join(txt: Rest<Coerced<String>>) -> String {
    let mut txt = txt
        .into_inner()
        .into_iter()
        .map(|mut c| {
            c.0.push(' ');
            c.0
        })
        .collect::<String>();
    txt.pop(); // remove the last space
    txt.push('\n'); // add a newline at the end
    txt
}

#[rquickjs::module(rename_vars = "camelCase", rename_types = "camelCase")]
#[allow(clippy::module_inception)]
pub mod console {
    use super::*;

    #[rquickjs::function]
    pub fn log(txt: Rest<Coerced<String>>) -> rquickjs::Result<()> {
        print(join(txt));
        Ok(())
    }

    #[rquickjs::function]
    pub fn error(txt: Rest<Coerced<String>>) -> rquickjs::Result<()> {
        eprint!("{}", join(txt));
        Ok(())
    }
}
