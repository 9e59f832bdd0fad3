use tiny_http::{Response, Server};

fn main() {
    let server = Server::http("0.0.0.0:8000").unwrap();
    for request in server.incoming_requests() {
        if request.url() == "/health" {
            let response = Response::from_string("{\"status\":\"ok\"}")
                .with_header("Content-Type: application/json".parse::<tiny_http::Header>().unwrap());
            let _ = request.respond(response);
        } else {
            let _ = request.respond(Response::from_string("not found").with_status_code(404));
        }
    }
}
