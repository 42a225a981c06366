use std::process;

use erupt::vk;
use hybridtrace::{
    camera::command_for,
    error::RenderError,
    options::{Options, OptionsError, USAGE},
    App,
};
use winit::{
    dpi::PhysicalSize,
    event::{DeviceEvent, ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

fn exit_code(error: &anyhow::Error) -> i32 {
    error.chain().find_map(|cause| cause.downcast_ref::<RenderError>()).map_or(1, RenderError::exit_code)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match Options::from_env() {
        Ok(options) => options,
        Err(OptionsError::Help) => {
            println!("{}", USAGE);
            return;
        }
        Err(error) => {
            eprintln!("{}\n{}", error, USAGE);
            process::exit(1);
        }
    };

    let event_loop = EventLoop::new();
    let window_extent = options.context.window_extent();
    let window = match WindowBuilder::new()
        .with_title("HybridTrace")
        .with_inner_size(PhysicalSize::new(window_extent.width, window_extent.height))
        .build(&event_loop)
    {
        Ok(window) => window,
        Err(error) => {
            log::error!("Cannot create window: {}", error);
            process::exit(1);
        }
    };

    let mut app = match App::new(&window, &options) {
        Ok(app) => Some(app),
        Err(error) => {
            log::error!("{:#}", error);
            process::exit(exit_code(&error));
        }
    };

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        let running = match app.as_mut() {
            Some(app) => app,
            None => return,
        };

        let result = match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    *control_flow = ControlFlow::Exit;
                    Ok(())
                }
                WindowEvent::Resized(size) => running.resize(vk::Extent2D { width: size.width, height: size.height }),
                WindowEvent::KeyboardInput {
                    input: KeyboardInput { virtual_keycode: Some(key), state, .. },
                    ..
                } => {
                    if running.controller.key(key, state) || state != ElementState::Pressed {
                        Ok(())
                    } else if key == VirtualKeyCode::Escape {
                        *control_flow = ControlFlow::Exit;
                        Ok(())
                    } else if let Some(command) = command_for(key) {
                        running.apply(command)
                    } else {
                        Ok(())
                    }
                }
                WindowEvent::MouseInput { button, state, .. } => {
                    running.controller.mouse_button(button, state);
                    Ok(())
                }
                _ => Ok(()),
            },
            Event::DeviceEvent { event: DeviceEvent::MouseMotion { delta }, .. } => {
                running.controller.mouse_motion(delta);
                Ok(())
            }
            Event::MainEventsCleared => {
                window.request_redraw();
                Ok(())
            }
            Event::RedrawRequested(_) => {
                let size = window.inner_size();
                if size.width == 0 || size.height == 0 {
                    Ok(())
                } else {
                    match running.render() {
                        Err(error) if error.is_out_of_date() => {
                            log::debug!("Swap chain out of date, rebuilding");
                            running.resize(vk::Extent2D { width: size.width, height: size.height })
                        }
                        result => result,
                    }
                }
            }
            Event::LoopDestroyed => {
                app = None;
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(error) = result {
            if error.is_device_lost() {
                log::error!("Device lost: {}", error);
            } else {
                log::error!("{}", error);
            }
            let code = error.exit_code();
            app = None;
            process::exit(code);
        }
    });
}
