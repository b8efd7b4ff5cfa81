//! Repeating timer: five ticks, then a clean shutdown.

use pontis::{EventLoop, RunMode, Timer};

use std::cell::Cell;
use std::rc::Rc;

fn main() {
    env_logger::init();

    let lp = EventLoop::new();
    let timer = Timer::new(&lp);

    let ticks = Rc::new(Cell::new(0));
    let t = timer.clone();

    timer.start(
        move || {
            ticks.set(ticks.get() + 1);
            println!("tick {}", ticks.get());

            if ticks.get() == 5 {
                t.stop();
                t.close(|| println!("timer closed"));
            }
        },
        200,
        200,
    );

    lp.run(RunMode::Default);
    println!("loop drained");
}
