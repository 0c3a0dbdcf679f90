//! Vector add, walked through the five stages by hand.

use clpipe::{
    add::{ramp_inputs, VEC_ADD_ENTRY, VEC_ADD_SOURCE},
    Access, ClError, Grid, KernelArg, Session, SessionConfig,
};

#[cfg(feature = "metrics")]
use clpipe::metrics::summary;

fn main() -> Result<(), ClError> {
    /* ---------- 1./2. Plattform, Kontext, Queue ------------------ */
    let session = Session::acquire(&SessionConfig::default())?;

    /* ---------- Hostdaten ---------------------------------------- */
    let n = 1 << 20;
    let (h_a, h_b) = ramp_inputs(n);

    /* ---------- 3. Programm bauen -------------------------------- */
    let program = session.build_program(VEC_ADD_SOURCE, "")?;
    let kernel = program.kernel(VEC_ADD_ENTRY)?;

    /* ---------- 4. Buffer anlegen & binden ----------------------- */
    let a = session.upload(Access::ReadOnly, &h_a)?;
    let b = session.upload(Access::ReadOnly, &h_b)?;
    let out = session.create_buffer::<f32>(Access::WriteOnly, n)?;
    let kernel = kernel.bind(
        &[KernelArg::buffer(&a), KernelArg::buffer(&b), KernelArg::buffer(&out)],
        None,
    )?;

    /* ---------- 5. Dispatch, Warten, Zurücklesen ----------------- */
    session.enqueue(&kernel, &Grid::linear(n)?)?.wait()?;
    let h_out = session.read(&out)?;

    /* ---------- Verifizieren ------------------------------------- */
    if let Some(i) = h_out.iter().position(|&x| x != n as f32) {
        return Err(ClError::ReadbackFailure(format!("element {i} is {}", h_out[i])));
    }
    println!("vec_add OK, first element = {}", h_out[0]);

    #[cfg(feature = "metrics")]
    print!("{}", summary());

    Ok(())
}
